//! Window identity and timing arithmetic.
//!
//! A window is identified purely by its aligned start second, so "the current
//! window" changes as soon as the clock crosses a boundary and no rotation
//! step is ever needed.

use std::time::Duration;

use super::clock::Timestamp;

/// An epoch-aligned window of `secs` seconds starting at `start` (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId {
    /// Window start, in seconds since the Unix epoch
    pub start: u64,
    /// Window length in seconds
    pub secs: u64,
}

impl WindowId {
    /// The window of length `secs` that contains `now`.
    ///
    /// `secs` must be non-zero; policies guarantee this.
    pub fn containing(now: Timestamp, secs: u64) -> Self {
        let now_secs = now / 1000;
        Self {
            start: (now_secs / secs) * secs,
            secs,
        }
    }

    /// The window immediately before this one.
    ///
    /// A window starting at the epoch is its own predecessor.
    pub fn previous(&self) -> Self {
        Self {
            start: self.start.saturating_sub(self.secs),
            secs: self.secs,
        }
    }

    /// First second after this window, in epoch seconds.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.secs)
    }

    fn start_ms(&self) -> u64 {
        self.start.saturating_mul(1000)
    }

    fn end_ms(&self) -> u64 {
        self.end().saturating_mul(1000)
    }

    /// Elapsed fraction of this window at `now`, clamped to `[0, 1)`.
    pub fn position(&self, now: Timestamp) -> f64 {
        let len_ms = self.secs.saturating_mul(1000) as f64;
        let elapsed = now.saturating_sub(self.start_ms()) as f64;
        (elapsed / len_ms).clamp(0.0, MAX_POSITION)
    }

    /// Whole seconds until the window ends, rounded up and never negative.
    pub fn reset_secs(&self, now: Timestamp) -> u64 {
        let left_ms = self.end_ms().saturating_sub(now);
        left_ms.div_ceil(1000)
    }

    /// Time from `now` until `extra_windows` windows after this one have ended.
    ///
    /// Used as a TTL so a bucket stays readable while it is still needed.
    pub fn ttl_until_end_plus(&self, now: Timestamp, extra_windows: u64) -> Duration {
        let extra_ms = extra_windows.saturating_mul(self.secs).saturating_mul(1000);
        let expires_ms = self.end_ms().saturating_add(extra_ms);
        Duration::from_millis(expires_ms.saturating_sub(now))
    }
}

/// Largest value [`WindowId::position`] returns.
const MAX_POSITION: f64 = 1.0 - f64::EPSILON;

/// Round to a fixed number of decimal places for display.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_alignment() {
        // 1_700_000_010 s is 30 s into the minute starting at 1_699_999_980.
        let w = WindowId::containing(1_700_000_010_000, 60);
        assert_eq!(w.start, 1_699_999_980);
        assert_eq!(w.end(), 1_700_000_040);
        assert_eq!(w.previous().start, 1_699_999_920);
    }

    #[test]
    fn test_same_window_until_boundary() {
        let a = WindowId::containing(120_000, 60);
        let b = WindowId::containing(179_999, 60);
        let c = WindowId::containing(180_000, 60);
        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_eq!(c.previous(), a);
    }

    #[test]
    fn test_position() {
        let w = WindowId::containing(120_000, 60);
        assert_eq!(w.position(120_000), 0.0);
        assert!((w.position(150_000) - 0.5).abs() < 1e-9);
        assert!(w.position(179_999) < 1.0);
    }

    #[test]
    fn test_position_is_clamped() {
        let w = WindowId { start: 120, secs: 60 };
        // Clock behind the window start
        assert_eq!(w.position(100_000), 0.0);
        // Clock past the window end
        assert!(w.position(500_000) < 1.0);
    }

    #[test]
    fn test_reset_secs_rounds_up_and_clamps() {
        let w = WindowId { start: 120, secs: 60 };
        assert_eq!(w.reset_secs(120_000), 60);
        assert_eq!(w.reset_secs(130_300), 50);
        assert_eq!(w.reset_secs(179_999), 1);
        assert_eq!(w.reset_secs(180_000), 0);
        assert_eq!(w.reset_secs(999_000), 0);
    }

    #[test]
    fn test_ttl_until_end_plus() {
        let w = WindowId { start: 120, secs: 60 };
        assert_eq!(w.ttl_until_end_plus(150_000, 0), Duration::from_secs(30));
        assert_eq!(w.ttl_until_end_plus(150_000, 1), Duration::from_secs(90));
    }

    #[test]
    fn test_huge_windows_saturate() {
        let w = WindowId {
            start: u64::MAX / 2,
            secs: u64::MAX / 2,
        };
        assert_eq!(w.end(), u64::MAX - 1);
        assert_eq!(w.reset_secs(0), u64::MAX / 1000 + 1);
        assert_eq!(w.position(0), 0.0);
        assert_eq!(w.ttl_until_end_plus(0, 1), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(2.449, 1), 2.4);
        assert_eq!(round_to(2.45001, 1), 2.5);
        assert_eq!(round_to(0.126, 2), 0.13);
    }
}
