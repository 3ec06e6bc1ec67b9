//! Decision engine: the entry point callers use to limit requests.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::backend::{Counters, WindowLimiter};
use super::clock::Clock;
use super::fixed::FixedWindowLimiter;
use super::key::{ClientKey, Keyspace, DEFAULT_KEY_PREFIX};
use super::policy::{Mode, Policy};
use super::rules::{RouteRule, RuleSet};
use super::sliding::SlidingWindowLimiter;
use super::verdict::{Status, Verdict};
use super::window::WindowId;
use crate::error::{RateWindowError, Result};
use crate::store::{CounterStore, StoreError};

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Admit requests when the counter store cannot be reached
    pub fail_open: bool,
    /// Namespace for every key written to the store
    pub key_prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fail_open: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// A verdict together with the usage snapshot it was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    pub status: Status,
}

/// Dispatches requests to the fixed or sliding window limiter.
///
/// A rejected request is an ordinary [`Verdict`], never an error. When the
/// store fails the engine admits or rejects according to
/// [`EngineOptions::fail_open`], logs a warning and counts the failure.
pub struct RateLimitEngine {
    fixed: FixedWindowLimiter,
    sliding: SlidingWindowLimiter,
    clock: Arc<dyn Clock>,
    fail_open: bool,
    rules: RwLock<RuleSet>,
    store_failures: AtomicU64,
}

impl RateLimitEngine {
    /// Create an engine over the given store and clock, with the default rules.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, options: EngineOptions) -> Self {
        let counters = Counters::new(store, clock.clone(), Keyspace::new(options.key_prefix));
        Self {
            fixed: FixedWindowLimiter::new(counters.clone()),
            sliding: SlidingWindowLimiter::new(counters),
            clock,
            fail_open: options.fail_open,
            rules: RwLock::new(RuleSet::default()),
            store_failures: AtomicU64::new(0),
        }
    }

    /// Replace the route rules, builder style.
    pub fn with_rules(self, rules: RuleSet) -> Self {
        self.set_rules(rules);
        self
    }

    /// Replace the route rules.
    pub fn set_rules(&self, rules: RuleSet) {
        info!(scope = %rules.scope, routes = rules.routes.len(), "Rate limit rules updated");
        *self.rules.write() = rules;
    }

    /// Get the current route rules.
    pub fn rules(&self) -> RuleSet {
        self.rules.read().clone()
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Number of store failures seen since the engine started.
    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    fn limiter(&self, mode: Mode) -> &dyn WindowLimiter {
        match mode {
            Mode::Fixed => &self.fixed,
            Mode::Sliding => &self.sliding,
        }
    }

    fn reset_secs(&self, policy: Policy) -> u64 {
        let now = self.clock.now();
        WindowId::containing(now, policy.window_secs()).reset_secs(now)
    }

    fn store_failed(&self, client: &ClientKey, mode: Mode, action: &str, error: &StoreError) {
        let failures = self.store_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            client = %client,
            mode = %mode,
            action = action,
            error = %error,
            fail_open = self.fail_open,
            failures = failures,
            "Counter store unavailable"
        );
    }

    fn degraded_verdict(&self, policy: Policy) -> Verdict {
        let reset_secs = self.reset_secs(policy);
        if self.fail_open {
            Verdict::unmetered(policy.limit(), reset_secs)
        } else {
            Verdict::refused(reset_secs)
        }
    }

    /// Count one request from `client` and decide whether it is admitted.
    pub async fn evaluate(&self, client: &ClientKey, policy: Policy, mode: Mode) -> Verdict {
        let limiter = self.limiter(mode);
        trace!(client = %client, mode = %limiter.mode(), "Evaluating request");

        match limiter.record(client, policy).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.store_failed(client, limiter.mode(), "evaluate", &e);
                self.degraded_verdict(policy)
            }
        }
    }

    /// Count one request and also return the snapshot behind the verdict.
    pub async fn decide(&self, client: &ClientKey, policy: Policy, mode: Mode) -> Decision {
        let outcome = match mode {
            Mode::Fixed => match self.fixed.check_and_increment(client, policy).await {
                Ok(verdict) => self
                    .fixed
                    .current_status(client, policy)
                    .await
                    .map(|status| (verdict, Status::Fixed(status))),
                Err(e) => Err(e),
            },
            Mode::Sliding => self
                .sliding
                .record_and_evaluate(client, policy)
                .await
                .map(|(verdict, snapshot)| (verdict, Status::Sliding(snapshot))),
        };

        match outcome {
            Ok((verdict, status)) => Decision { verdict, status },
            Err(e) => {
                self.store_failed(client, mode, "decide", &e);
                Decision {
                    verdict: self.degraded_verdict(policy),
                    status: Status::Unavailable {
                        limit: policy.limit(),
                        reset_secs: self.reset_secs(policy),
                    },
                }
            }
        }
    }

    /// Report usage without counting a request.
    pub async fn status(&self, client: &ClientKey, policy: Policy, mode: Mode) -> Status {
        let limiter = self.limiter(mode);
        match limiter.status(client, policy).await {
            Ok(status) => status,
            Err(e) => {
                self.store_failed(client, limiter.mode(), "status", &e);
                Status::Unavailable {
                    limit: policy.limit(),
                    reset_secs: self.reset_secs(policy),
                }
            }
        }
    }

    /// Clear every counter held for `client` under `mode`.
    ///
    /// Idempotent. Store failures are logged and counted but not returned.
    ///
    /// Counters are located through the window length the client was last
    /// limited with in this mode. If one client key is limited with several
    /// window lengths, only the buckets of the most recent one are cleared;
    /// the others still expire on their own TTL.
    pub async fn reset(&self, client: &ClientKey, mode: Mode) {
        let limiter = self.limiter(mode);
        match limiter.reset(client).await {
            Ok(()) => info!(client = %client, mode = %limiter.mode(), "Rate limit counters reset"),
            Err(e) => self.store_failed(client, limiter.mode(), "reset", &e),
        }
    }

    /// Look up a route's rule and the client key it limits.
    ///
    /// The key is built here so the rules lock is not held across awaits.
    fn route(&self, route: &str, client: &str) -> Result<(RouteRule, ClientKey)> {
        let rules = self.rules.read();
        let rule = rules
            .find(route)
            .cloned()
            .ok_or_else(|| RateWindowError::UnknownRoute(route.to_string()))?;
        Ok((rule, rules.client_key(route, client)))
    }

    /// Evaluate a request to a configured route.
    pub async fn check_route(&self, route: &str, client: &str) -> Result<Decision> {
        let (rule, key) = self.route(route, client)?;
        let policy = rule.policy()?;
        let decision = self.decide(&key, policy, rule.mode).await;

        debug!(
            route = %route,
            client = %client,
            admitted = decision.verdict.admitted,
            count = decision.verdict.count,
            "Route decision made"
        );
        Ok(decision)
    }

    /// Usage of a configured route by a client.
    pub async fn route_status(&self, route: &str, client: &str) -> Result<Status> {
        let (rule, key) = self.route(route, client)?;
        let policy = rule.policy()?;
        Ok(self.status(&key, policy, rule.mode).await)
    }

    /// Clear a client's counters for a configured route.
    pub async fn reset_route(&self, route: &str, client: &str) -> Result<()> {
        let (rule, key) = self.route(route, client)?;
        self.reset(&key, rule.mode).await;
        Ok(())
    }
}
