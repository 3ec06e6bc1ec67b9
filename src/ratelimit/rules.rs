//! Per-route rate limit rules.
//!
//! A rule set names a scope and lists the routes limited within it, each
//! with its own limit, window and algorithm:
//!
//! ```yaml
//! scope: rate_limiting
//! routes:
//!   - route: create
//!     requests_per_unit: 4
//!     unit: minute
//!   - route: sliding_window
//!     requests_per_unit: 5
//!     window_secs: 60
//!     mode: sliding
//! ```
//!
//! Every rule is turned into a [`Policy`] when the set is loaded, so a bad
//! limit or window fails at configuration time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::key::ClientKey;
use super::policy::{Mode, Policy};
use crate::error::{RateWindowError, Result};

/// A complete set of route rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Scope prefixed to every client key built from these rules
    pub scope: String,
    /// Rules for individual routes
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

/// The limit applied to one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Route name, unique within the rule set
    pub route: String,
    /// Number of requests allowed per window
    pub requests_per_unit: u64,
    /// Window given as a named unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<TimeUnit>,
    /// Window given in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    /// Limiting algorithm
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Optional name/description for this limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_mode() -> Mode {
    Mode::Fixed
}

/// Named window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn as_secs(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86400,
        }
    }
}

impl RouteRule {
    /// The validated policy for this route.
    pub fn policy(&self) -> Result<Policy> {
        let window_secs = match (self.unit, self.window_secs) {
            (Some(unit), None) => unit.as_secs(),
            (None, Some(secs)) => secs,
            (Some(_), Some(_)) => {
                return Err(RateWindowError::InvalidPolicy(format!(
                    "route '{}' sets both unit and window_secs",
                    self.route
                )))
            }
            (None, None) => {
                return Err(RateWindowError::InvalidPolicy(format!(
                    "route '{}' needs a unit or window_secs",
                    self.route
                )))
            }
        };

        Policy::new(self.requests_per_unit, window_secs).map_err(|e| match e {
            RateWindowError::InvalidPolicy(reason) => {
                RateWindowError::InvalidPolicy(format!("route '{}': {}", self.route, reason))
            }
            other => other,
        })
    }
}

impl RuleSet {
    /// Create an empty rule set for a scope.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            routes: Vec::new(),
        }
    }

    /// Add a rule, builder style. Call [`validate`](Self::validate) afterwards.
    pub fn with_route(mut self, route: &str, policy: Policy, mode: Mode) -> Self {
        self.routes.push(RouteRule {
            route: route.to_string(),
            requests_per_unit: policy.limit(),
            unit: None,
            window_secs: Some(policy.window_secs()),
            mode,
            name: None,
        });
        self
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RuleSet = serde_yaml::from_str(yaml)
            .map_err(|e| RateWindowError::Config(format!("Failed to parse rate limit rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Render the rules as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| RateWindowError::Config(e.to_string()))
    }

    /// Check every rule's policy and reject duplicate routes.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.routes {
            if !seen.insert(rule.route.as_str()) {
                return Err(RateWindowError::Config(format!(
                    "route '{}' is defined more than once",
                    rule.route
                )));
            }
            rule.policy()?;
        }
        Ok(())
    }

    /// Find the rule for a route.
    pub fn find(&self, route: &str) -> Option<&RouteRule> {
        self.routes.iter().find(|rule| rule.route == route)
    }

    /// Client key for a request to `route` from `client`.
    pub fn client_key(&self, route: &str, client: &str) -> ClientKey {
        ClientKey::new(&self.scope, route, client)
    }
}

impl Default for RuleSet {
    /// Four requests a minute on `create` and five a minute, sliding, on
    /// `sliding_window`.
    fn default() -> Self {
        RuleSet {
            scope: "rate_limiting".to_string(),
            routes: vec![
                RouteRule {
                    route: "create".to_string(),
                    requests_per_unit: 4,
                    unit: Some(TimeUnit::Minute),
                    window_secs: None,
                    mode: Mode::Fixed,
                    name: Some("api".to_string()),
                },
                RouteRule {
                    route: "sliding_window".to_string(),
                    requests_per_unit: 5,
                    unit: Some(TimeUnit::Minute),
                    window_secs: None,
                    mode: Mode::Sliding,
                    name: Some("sliding window api".to_string()),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let yaml = r#"
scope: api
routes:
  - route: create
    requests_per_unit: 4
    unit: minute
  - route: search
    requests_per_unit: 5
    window_secs: 30
    mode: sliding
    name: search api
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.scope, "api");
        assert_eq!(rules.routes.len(), 2);

        let create = rules.find("create").unwrap();
        assert_eq!(create.mode, Mode::Fixed);
        assert_eq!(create.policy().unwrap(), Policy::new(4, 60).unwrap());

        let search = rules.find("search").unwrap();
        assert_eq!(search.mode, Mode::Sliding);
        assert_eq!(search.policy().unwrap(), Policy::new(5, 30).unwrap());
        assert_eq!(search.name.as_deref(), Some("search api"));

        assert!(rules.find("missing").is_none());
    }

    #[test]
    fn test_invalid_policy_rejected_at_load() {
        let yaml = r#"
scope: api
routes:
  - route: create
    requests_per_unit: 0
    unit: minute
"#;
        let err = RuleSet::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RateWindowError::InvalidPolicy(_)));
        assert!(err.to_string().contains("create"));
    }

    #[test]
    fn test_window_must_be_given_once() {
        let both = r#"
scope: api
routes:
  - route: create
    requests_per_unit: 1
    unit: second
    window_secs: 1
"#;
        assert!(RuleSet::from_yaml(both).is_err());

        let neither = r#"
scope: api
routes:
  - route: create
    requests_per_unit: 1
"#;
        assert!(RuleSet::from_yaml(neither).is_err());
    }

    #[test]
    fn test_duplicate_routes_rejected() {
        let yaml = r#"
scope: api
routes:
  - route: create
    requests_per_unit: 1
    unit: second
  - route: create
    requests_per_unit: 2
    unit: second
"#;
        assert!(matches!(
            RuleSet::from_yaml(yaml),
            Err(RateWindowError::Config(_))
        ));
    }

    #[test]
    fn test_unparseable_yaml() {
        assert!(matches!(
            RuleSet::from_yaml("routes: [[["),
            Err(RateWindowError::Config(_))
        ));
    }

    #[test]
    fn test_default_rules() {
        let rules = RuleSet::default();
        rules.validate().unwrap();

        let create = rules.find("create").unwrap();
        assert_eq!(create.policy().unwrap(), Policy::new(4, 60).unwrap());
        assert_eq!(create.mode, Mode::Fixed);

        let sliding = rules.find("sliding_window").unwrap();
        assert_eq!(sliding.policy().unwrap(), Policy::new(5, 60).unwrap());
        assert_eq!(sliding.mode, Mode::Sliding);

        assert_eq!(
            rules.client_key("create", "example.com").as_str(),
            "rate_limiting:create:example.com"
        );
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let rules = RuleSet::default();
        let yaml = rules.to_yaml().unwrap();
        assert_eq!(RuleSet::from_yaml(&yaml).unwrap(), rules);
    }

    #[test]
    fn test_builder() {
        let rules = RuleSet::new("svc").with_route("login", Policy::new(3, 10).unwrap(), Mode::Sliding);
        rules.validate().unwrap();
        assert_eq!(rules.find("login").unwrap().policy().unwrap().window_secs(), 10);
    }
}
