//! Time sources for the limiters.
//!
//! Limiters never read the wall clock directly; a [`Clock`] is injected so
//! that window rollover can be driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Pre-epoch clocks are treated as the epoch itself.
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now_ms`.
    pub fn new(now_ms: Timestamp) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Create a clock frozen at a whole number of seconds.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1000)
    }

    /// Jump to an absolute time. Moving backwards is allowed.
    pub fn set(&self, now_ms: Timestamp) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now_ms.load(Ordering::SeqCst)
    }
}
