//! Sliding-window weighted counter.
//!
//! Two aligned fixed windows approximate a continuously sliding one. The
//! previous window's count is weighted by the part of it that still overlaps
//! a window-length span ending now:
//!
//! ```text
//! weighted = current + previous * (1 - position)
//! ```
//!
//! where `position` is the elapsed fraction of the current window. This
//! assumes arrivals were spread evenly over the previous window. It needs two
//! counters per client instead of one timestamp per request, and keeps a
//! burst straddling a boundary to at most twice the limit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::backend::{Counters, WindowLimiter};
use super::key::ClientKey;
use super::policy::{Mode, Policy};
use super::verdict::{SlidingSnapshot, Status, Verdict};
use super::window::{round_to, WindowId};
use crate::store::StoreError;

/// Estimated request count over the window ending now.
pub fn weighted_count(current: u64, previous: u64, position: f64) -> f64 {
    let position = position.clamp(0.0, 1.0);
    current as f64 + previous as f64 * (1.0 - position)
}

/// Sliding-window rate limiter.
pub struct SlidingWindowLimiter {
    counters: Counters,
}

impl SlidingWindowLimiter {
    pub fn new(counters: Counters) -> Self {
        Self { counters }
    }

    /// Count a request in the current window and evaluate the weighted count.
    pub async fn record_and_evaluate(
        &self,
        client: &ClientKey,
        policy: Policy,
    ) -> Result<(Verdict, SlidingSnapshot), StoreError> {
        self.run(client, policy, true).await
    }

    /// Evaluate the weighted count without counting a request.
    pub async fn evaluate(
        &self,
        client: &ClientKey,
        policy: Policy,
    ) -> Result<(Verdict, SlidingSnapshot), StoreError> {
        self.run(client, policy, false).await
    }

    async fn run(
        &self,
        client: &ClientKey,
        policy: Policy,
        record: bool,
    ) -> Result<(Verdict, SlidingSnapshot), StoreError> {
        let store = &self.counters.store;
        let keyspace = &self.counters.keyspace;

        let now = self.counters.now();
        let window = WindowId::containing(now, policy.window_secs());
        let current_bucket = keyspace.bucket(Mode::Sliding, client, window);
        let previous = window.previous();
        // A window starting at the epoch has no predecessor to weigh in.
        let has_previous = previous != window;
        let previous_bucket = keyspace.bucket(Mode::Sliding, client, previous);
        let current_key = current_bucket.to_store_key();
        let previous_key = previous_bucket.to_store_key();
        let marker_key = current_bucket.marker_key();

        trace!(
            client = %client,
            window = window.start,
            record = record,
            "Checking sliding window"
        );

        let (current_count, previous_count, marker) = if record {
            // Keep the bucket readable for one more window after it stops
            // being current, while it serves as the previous bucket.
            let ttl = window.ttl_until_end_plus(now, 1);
            let (current, previous, _, _) = futures::try_join!(
                store.increment_by(&current_key, 1, ttl),
                store.get(&previous_key),
                store.set(&marker_key, window.end(), ttl),
                self.counters.remember_window(Mode::Sliding, client, policy),
            )?;
            if current == 1 {
                debug!(bucket = %current_bucket, "Created sliding window bucket");
            }
            let previous = previous.filter(|_| has_previous).unwrap_or(0);
            (current, previous, Some(window.end()))
        } else {
            let (current, previous, marker) = futures::try_join!(
                store.get(&current_key),
                store.get(&previous_key),
                store.get(&marker_key),
            )?;
            let previous = previous.filter(|_| has_previous).unwrap_or(0);
            (current.unwrap_or(0), previous, marker)
        };

        let position = window.position(now);
        let weighted = weighted_count(current_count, previous_count, position);
        // Admission uses the unrounded estimate; rounding is for display only.
        let exceeded = weighted > policy.limit() as f64;

        let count = round_to(weighted, 1);
        let remaining = round_to((policy.limit() as f64 - count).max(0.0), 1);
        let reset_secs = window.reset_secs(now);

        if exceeded && record {
            debug!(
                client = %client,
                weighted = weighted,
                current_count = current_count,
                previous_count = previous_count,
                limit = policy.limit(),
                "Sliding window limit exceeded"
            );
        }

        let verdict = Verdict {
            admitted: !exceeded,
            count,
            remaining: if exceeded { 0.0 } else { remaining },
            reset_secs,
        };

        let expires_at = marker.unwrap_or_else(|| window.end());
        let snapshot = SlidingSnapshot {
            count,
            current_count,
            previous_count,
            position: round_to(position, 2),
            limit: policy.limit(),
            remaining,
            reset_secs,
            window_secs: policy.window_secs(),
            current_key,
            previous_key,
            exceeded,
            current_window_expires_at: DateTime::<Utc>::from_timestamp(expires_at as i64, 0)
                .unwrap_or_default(),
            seconds_until_expiry: reset_secs,
        };

        Ok((verdict, snapshot))
    }
}

#[async_trait]
impl WindowLimiter for SlidingWindowLimiter {
    fn mode(&self) -> Mode {
        Mode::Sliding
    }

    async fn record(&self, client: &ClientKey, policy: Policy) -> Result<Verdict, StoreError> {
        self.record_and_evaluate(client, policy)
            .await
            .map(|(verdict, _)| verdict)
    }

    async fn status(&self, client: &ClientKey, policy: Policy) -> Result<Status, StoreError> {
        self.evaluate(client, policy)
            .await
            .map(|(_, snapshot)| Status::Sliding(snapshot))
    }

    async fn reset(&self, client: &ClientKey) -> Result<(), StoreError> {
        self.counters.reset_windows(Mode::Sliding, client).await
    }
}
