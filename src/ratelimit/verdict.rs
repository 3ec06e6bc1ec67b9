//! Decision and status types returned by the limiters.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::Mode;

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Raw count (fixed) or weighted count rounded to one decimal (sliding)
    pub count: f64,
    /// Headroom left in the window; always zero on rejection
    pub remaining: f64,
    /// Seconds until the window rolls over, usable as a retry-after hint
    pub reset_secs: u64,
}

impl Verdict {
    /// An admission reporting no usage, used when the store cannot be reached.
    pub(crate) fn unmetered(limit: u64, reset_secs: u64) -> Self {
        Self {
            admitted: true,
            count: 0.0,
            remaining: limit as f64,
            reset_secs,
        }
    }

    /// A rejection reporting no usage, used when the store cannot be reached.
    pub(crate) fn refused(reset_secs: u64) -> Self {
        Self {
            admitted: false,
            count: 0.0,
            remaining: 0.0,
            reset_secs,
        }
    }
}

/// Read-only view of a fixed-window bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedStatus {
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
    pub bucket_key: String,
    /// When the reset marker says the window ends, if a marker is present
    pub expires_at: Option<DateTime<Utc>>,
}

/// Details of a sliding-window evaluation, for display and debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlidingSnapshot {
    /// Weighted count, rounded to one decimal
    pub count: f64,
    pub current_count: u64,
    pub previous_count: u64,
    /// Elapsed fraction of the current window, rounded to two decimals
    pub position: f64,
    pub limit: u64,
    pub remaining: f64,
    pub reset_secs: u64,
    pub window_secs: u64,
    pub current_key: String,
    pub previous_key: String,
    pub exceeded: bool,
    pub current_window_expires_at: DateTime<Utc>,
    pub seconds_until_expiry: u64,
}

/// Status snapshot for either limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Status {
    Fixed(FixedStatus),
    Sliding(SlidingSnapshot),
    /// The store could not be read
    Unavailable { limit: u64, reset_secs: u64 },
}

impl Status {
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Status::Fixed(_) => Some(Mode::Fixed),
            Status::Sliding(_) => Some(Mode::Sliding),
            Status::Unavailable { .. } => None,
        }
    }
}
