//! Configuration management for ratewindow.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RateWindowError, Result};
use crate::ratelimit::{EngineOptions, RuleSet, DEFAULT_KEY_PREFIX};

/// Prefix for environment overrides, e.g. `RATEWINDOW__ENGINE__FAIL_OPEN=false`.
const ENV_PREFIX: &str = "RATEWINDOW";

/// Main configuration for the ratewindow service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Decision engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Inline route rules
    #[serde(default)]
    pub rules: Option<RuleSet>,

    /// Path to a separate route rules file; takes precedence over `rules`
    #[serde(default)]
    pub rules_path: Option<String>,
}

/// Decision engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Admit requests when the counter store is unreachable
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_open: default_fail_open(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_fail_open() -> bool {
    true
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        EngineOptions {
            fail_open: config.fail_open,
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// Which counter store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; counters are lost on restart
    #[default]
    Memory,
    /// Redis server (requires the `redis` feature)
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the Redis backend
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `ratewindow=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RateWindowConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RateWindowConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateWindowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path, without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateWindowConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateWindowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.key_prefix.is_empty() || self.engine.key_prefix.contains('|') {
            return Err(RateWindowError::Config(
                "engine.key_prefix must be non-empty and must not contain '|'".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(RateWindowError::Config(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }
        if let Some(rules) = &self.rules {
            rules.validate()?;
        }
        Ok(())
    }

    /// The effective route rules: the rules file, else inline rules, else defaults.
    pub fn load_rules(&self) -> Result<RuleSet> {
        match (&self.rules_path, &self.rules) {
            (Some(path), _) => RuleSet::from_file(Path::new(path)),
            (None, Some(rules)) => Ok(rules.clone()),
            (None, None) => Ok(RuleSet::default()),
        }
    }
}
