//! Rate limit policies and limiter selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RateWindowError, Result};

/// Longest accepted window, in seconds.
///
/// Window arithmetic runs in milliseconds and looks up to three windows
/// ahead, so this keeps every derived timestamp inside `u64`.
pub const MAX_WINDOW_SECS: u64 = u64::MAX / 4000;

/// Maximum count permitted per window.
///
/// Policies can only be built through [`Policy::new`], so a zero limit or a
/// zero-length window is rejected when the policy is configured rather than
/// on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Policy {
    limit: u64,
    window_secs: u64,
}

impl Policy {
    /// Create a validated policy.
    pub fn new(limit: u64, window_secs: u64) -> Result<Self> {
        if limit == 0 {
            return Err(RateWindowError::InvalidPolicy(
                "limit must be greater than zero".to_string(),
            ));
        }
        if window_secs == 0 {
            return Err(RateWindowError::InvalidPolicy(
                "window_secs must be greater than zero".to_string(),
            ));
        }
        if window_secs > MAX_WINDOW_SECS {
            return Err(RateWindowError::InvalidPolicy(format!(
                "window_secs must be at most {}",
                MAX_WINDOW_SECS
            )));
        }
        Ok(Self { limit, window_secs })
    }

    /// Maximum permitted count per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            limit: u64,
            window_secs: u64,
        }

        let raw = Raw::deserialize(deserializer)?;
        Policy::new(raw.limit, raw.window_secs).map_err(serde::de::Error::custom)
    }
}

/// Which limiting algorithm to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One counter per aligned window
    Fixed,
    /// Weighted estimate over the current and previous windows
    Sliding,
}

impl Mode {
    /// Short name used in store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Fixed => "fixed",
            Mode::Sliding => "sliding",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = RateWindowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(Mode::Fixed),
            "sliding" => Ok(Mode::Sliding),
            other => Err(RateWindowError::Config(format!(
                "unknown mode '{}', expected 'fixed' or 'sliding'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_validation() {
        let policy = Policy::new(4, 60).unwrap();
        assert_eq!(policy.limit(), 4);
        assert_eq!(policy.window_secs(), 60);

        assert!(matches!(
            Policy::new(0, 60),
            Err(RateWindowError::InvalidPolicy(_))
        ));
        assert!(matches!(
            Policy::new(4, 0),
            Err(RateWindowError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_policy_rejects_oversized_window() {
        assert!(Policy::new(1, MAX_WINDOW_SECS).is_ok());
        assert!(matches!(
            Policy::new(1, MAX_WINDOW_SECS + 1),
            Err(RateWindowError::InvalidPolicy(_))
        ));
        assert!(matches!(
            Policy::new(1, u64::MAX / 2),
            Err(RateWindowError::InvalidPolicy(_))
        ));

        let yaml = format!("limit: 1\nwindow_secs: {}\n", u64::MAX);
        assert!(serde_yaml::from_str::<Policy>(&yaml).is_err());
    }

    #[test]
    fn test_policy_deserialize_validates() {
        let policy: Policy = serde_yaml::from_str("limit: 5\nwindow_secs: 60\n").unwrap();
        assert_eq!(policy, Policy::new(5, 60).unwrap());

        let err = serde_yaml::from_str::<Policy>("limit: 0\nwindow_secs: 60\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fixed".parse::<Mode>().unwrap(), Mode::Fixed);
        assert_eq!("sliding".parse::<Mode>().unwrap(), Mode::Sliding);
        assert!("token_bucket".parse::<Mode>().is_err());
        assert_eq!(Mode::Sliding.to_string(), "sliding");
    }
}
