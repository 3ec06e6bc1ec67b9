use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewindow::config::{LoggingConfig, RateWindowConfig, StoreBackend};
use ratewindow::ratelimit::{
    ClientKey, Decision, EngineOptions, Mode, Policy, RateLimitEngine, SystemClock,
};
use ratewindow::store::{CounterStore, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "ratewindow", version, about = "Fixed and sliding window rate limiting")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a series of requests through the engine and print each decision
    Simulate(SimulateArgs),
    /// Print the effective route rules as YAML
    Rules,
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// Requesting client, e.g. a domain name
    #[arg(long, default_value = "example.com")]
    client: String,

    /// Configured route to limit; ignored when --limit is given
    #[arg(long, default_value = "create")]
    route: String,

    /// Ad-hoc limit instead of a configured route
    #[arg(long, requires = "window_secs")]
    limit: Option<u64>,

    /// Window length in seconds for the ad-hoc limit
    #[arg(long)]
    window_secs: Option<u64>,

    /// Algorithm for the ad-hoc limit
    #[arg(long, default_value = "fixed")]
    mode: Mode,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 6)]
    requests: u32,

    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Extra random pause of up to this many milliseconds
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Reset the client's counters before sending
    #[arg(long)]
    reset: bool,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RateWindowConfig::load(cli.config.as_deref()).context("loading configuration")?;

    init_tracing(&config.logging);

    info!("Starting ratewindow");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules = config.load_rules().context("loading route rules")?;

    match cli.command {
        Command::Rules => {
            print!("{}", rules.to_yaml()?);
            Ok(())
        }
        Command::Simulate(args) => {
            let store = open_store(&config).await?;
            info!(
                backend = ?config.store.backend,
                fail_open = config.engine.fail_open,
                "Counter store ready"
            );

            let engine = RateLimitEngine::new(
                store,
                Arc::new(SystemClock),
                EngineOptions::from(&config.engine),
            )
            .with_rules(rules);

            tokio::select! {
                result = simulate(&engine, &args) => result,
                _ = shutdown_signal() => {
                    warn!("Simulation interrupted");
                    Ok(())
                }
            }
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(config: &RateWindowConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .context("store.redis_url is not set")?;
            Ok(Arc::new(ratewindow::store::RedisStore::connect(url).await?))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => anyhow::bail!("this build does not include the redis backend"),
    }
}

async fn simulate(engine: &RateLimitEngine, args: &SimulateArgs) -> anyhow::Result<()> {
    let adhoc = match (args.limit, args.window_secs) {
        (Some(limit), Some(window_secs)) => Some((Policy::new(limit, window_secs)?, args.mode)),
        _ => None,
    };
    let client = ClientKey::new("simulate", "adhoc", &args.client);

    if args.reset {
        match adhoc {
            Some((_, mode)) => engine.reset(&client, mode).await,
            None => engine.reset_route(&args.route, &args.client).await?,
        }
    }

    for n in 1..=args.requests {
        let decision = match adhoc {
            Some((policy, mode)) => engine.decide(&client, policy, mode).await,
            None => engine.check_route(&args.route, &args.client).await?,
        };
        report(n, &decision, args.json)?;

        let pause = args.interval_ms + jitter(args.jitter_ms);
        if pause > 0 && n < args.requests {
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }

    if engine.store_failures() > 0 {
        warn!(failures = engine.store_failures(), "Counter store failures during simulation");
    }
    Ok(())
}

fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_ms)
    }
}

fn report(n: u32, decision: &Decision, json: bool) -> anyhow::Result<()> {
    let verdict = &decision.verdict;
    if json {
        let line = serde_json::json!({
            "request": n,
            "verdict": verdict,
            "status": decision.status,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else if verdict.admitted {
        println!(
            "#{:<3} admitted  count={:<5} remaining={:<5} reset_in={}s",
            n, verdict.count, verdict.remaining, verdict.reset_secs
        );
    } else {
        println!(
            "#{:<3} REJECTED  count={:<5} retry_after={}s",
            n, verdict.count, verdict.reset_secs
        );
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
