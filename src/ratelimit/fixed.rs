//! Fixed-window counter.
//!
//! Each client gets one counter per epoch-aligned window. The counter is
//! created by the first request in the window, incremented atomically by the
//! store on every later request, and disappears when its TTL runs out.

use async_trait::async_trait;
use chrono::DateTime;
use std::time::Duration;
use tracing::{debug, trace};

use super::backend::{Counters, WindowLimiter};
use super::key::ClientKey;
use super::policy::{Mode, Policy};
use super::verdict::{FixedStatus, Status, Verdict};
use super::window::WindowId;
use crate::store::StoreError;

/// Fixed-window rate limiter.
pub struct FixedWindowLimiter {
    counters: Counters,
}

impl FixedWindowLimiter {
    pub fn new(counters: Counters) -> Self {
        Self { counters }
    }

    /// Count a request and decide whether it is within the policy.
    ///
    /// Rejected requests are counted too, so a client that keeps calling
    /// after being limited keeps raising its count until the window rolls.
    /// If the store loses the bucket mid-window the count restarts at 1.
    pub async fn check_and_increment(
        &self,
        client: &ClientKey,
        policy: Policy,
    ) -> Result<Verdict, StoreError> {
        let store = &self.counters.store;
        let now = self.counters.now();
        let window = WindowId::containing(now, policy.window_secs());
        let bucket = self.counters.keyspace.bucket(Mode::Fixed, client, window);
        let ttl = Duration::from_secs(policy.window_secs());

        trace!(bucket = %bucket, limit = policy.limit(), "Checking fixed window");

        let bucket_key = bucket.to_store_key();
        let marker_key = bucket.marker_key();

        let count = store.increment_by(&bucket_key, 1, ttl).await?;
        if count == 1 {
            debug!(
                bucket = %bucket,
                limit = policy.limit(),
                window_secs = policy.window_secs(),
                "Created fixed window bucket"
            );
        }

        // The reset marker is refreshed on every call, admitted or not.
        futures::try_join!(
            store.set(&marker_key, window.end(), ttl),
            self.counters.remember_window(Mode::Fixed, client, policy),
        )?;

        let admitted = count <= policy.limit();
        let reset_secs = window.reset_secs(now);

        if !admitted {
            debug!(
                client = %client,
                count = count,
                limit = policy.limit(),
                reset_secs = reset_secs,
                "Fixed window limit exceeded"
            );
        }

        Ok(Verdict {
            admitted,
            count: count as f64,
            remaining: if admitted {
                (policy.limit() - count) as f64
            } else {
                0.0
            },
            reset_secs,
        })
    }

    /// Read the client's bucket without counting a request.
    pub async fn current_status(
        &self,
        client: &ClientKey,
        policy: Policy,
    ) -> Result<FixedStatus, StoreError> {
        let store = &self.counters.store;
        let now = self.counters.now();
        let window = WindowId::containing(now, policy.window_secs());
        let bucket = self.counters.keyspace.bucket(Mode::Fixed, client, window);

        let bucket_key = bucket.to_store_key();
        let marker_key = bucket.marker_key();

        let (count, marker) = futures::try_join!(store.get(&bucket_key), store.get(&marker_key))?;
        let count = count.unwrap_or(0);

        Ok(FixedStatus {
            count,
            limit: policy.limit(),
            remaining: policy.limit().saturating_sub(count),
            reset_secs: window.reset_secs(now),
            bucket_key,
            expires_at: marker.and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        })
    }
}

#[async_trait]
impl WindowLimiter for FixedWindowLimiter {
    fn mode(&self) -> Mode {
        Mode::Fixed
    }

    async fn record(&self, client: &ClientKey, policy: Policy) -> Result<Verdict, StoreError> {
        self.check_and_increment(client, policy).await
    }

    async fn status(&self, client: &ClientKey, policy: Policy) -> Result<Status, StoreError> {
        self.current_status(client, policy).await.map(Status::Fixed)
    }

    async fn reset(&self, client: &ClientKey) -> Result<(), StoreError> {
        self.counters.reset_windows(Mode::Fixed, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Keyspace, ManualClock};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    // 1_699_999_980 is aligned to a 60 second boundary.
    const WINDOW_START: u64 = 1_699_999_980;

    fn limiter_at(secs: u64) -> (Arc<ManualClock>, Arc<MemoryStore>, FixedWindowLimiter) {
        let clock = Arc::new(ManualClock::at_secs(secs));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let counters = Counters::new(store.clone(), clock.clone(), Keyspace::default());
        (clock, store, FixedWindowLimiter::new(counters))
    }

    fn policy(limit: u64, window_secs: u64) -> Policy {
        Policy::new(limit, window_secs).unwrap()
    }

    #[tokio::test]
    async fn test_count_matches_number_of_calls() {
        let (_clock, _store, limiter) = limiter_at(WINDOW_START + 1);
        let client = ClientKey::from_raw("example.com");

        for n in 1..=10u64 {
            let verdict = limiter.check_and_increment(&client, policy(100, 60)).await.unwrap();
            assert_eq!(verdict.count, n as f64);
        }
    }

    #[tokio::test]
    async fn test_limit_four_per_minute() {
        let (clock, _store, limiter) = limiter_at(WINDOW_START + 5);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(4, 60);

        for n in 1..=4u64 {
            let verdict = limiter.check_and_increment(&client, policy).await.unwrap();
            assert!(verdict.admitted, "request {} should be admitted", n);
            assert_eq!(verdict.count, n as f64);
            assert_eq!(verdict.remaining, (4 - n) as f64);
        }

        clock.advance(Duration::from_secs(3));
        let verdict = limiter.check_and_increment(&client, policy).await.unwrap();
        assert!(!verdict.admitted);
        assert_eq!(verdict.count, 5.0);
        assert_eq!(verdict.remaining, 0.0);
        // 60 seconds minus the 8 that have elapsed in the window
        assert_eq!(verdict.reset_secs, 52);
    }

    #[tokio::test]
    async fn test_rejected_calls_keep_counting() {
        let (_clock, _store, limiter) = limiter_at(WINDOW_START);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(2, 60);

        for _ in 0..5 {
            limiter.check_and_increment(&client, policy).await.unwrap();
        }

        let status = limiter.current_status(&client, policy).await.unwrap();
        assert_eq!(status.count, 5);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_count() {
        let (clock, _store, limiter) = limiter_at(WINDOW_START + 10);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(4, 60);

        for _ in 0..6 {
            limiter.check_and_increment(&client, policy).await.unwrap();
        }

        clock.advance(Duration::from_secs(60));
        let verdict = limiter.check_and_increment(&client, policy).await.unwrap();
        assert!(verdict.admitted);
        assert_eq!(verdict.count, 1.0);
    }

    #[tokio::test]
    async fn test_lost_bucket_restarts_at_one() {
        let (_clock, store, limiter) = limiter_at(WINDOW_START);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(4, 60);

        limiter.check_and_increment(&client, policy).await.unwrap();
        limiter.check_and_increment(&client, policy).await.unwrap();

        for (key, _) in store.buckets() {
            crate::store::CounterStore::delete(store.as_ref(), &key.to_store_key())
                .await
                .unwrap();
        }

        let verdict = limiter.check_and_increment(&client, policy).await.unwrap();
        assert_eq!(verdict.count, 1.0);
    }

    #[tokio::test]
    async fn test_status_reports_marker() {
        let (_clock, _store, limiter) = limiter_at(WINDOW_START + 20);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(4, 60);

        let before = limiter.current_status(&client, policy).await.unwrap();
        assert_eq!(before.count, 0);
        assert_eq!(before.expires_at, None);

        limiter.check_and_increment(&client, policy).await.unwrap();
        let after = limiter.current_status(&client, policy).await.unwrap();
        assert_eq!(after.count, 1);
        assert_eq!(after.remaining, 3);
        assert_eq!(after.reset_secs, 40);
        assert_eq!(
            after.expires_at.map(|t| t.timestamp()),
            Some((WINDOW_START + 60) as i64)
        );
        assert_eq!(
            after.bucket_key,
            format!("rate-limit|fixed|example.com|{}", WINDOW_START)
        );
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let (_clock, _store, limiter) = limiter_at(WINDOW_START);
        let policy = policy(1, 60);
        let a = ClientKey::from_raw("a.example.com");
        let b = ClientKey::from_raw("b.example.com");

        assert!(limiter.check_and_increment(&a, policy).await.unwrap().admitted);
        assert!(!limiter.check_and_increment(&a, policy).await.unwrap().admitted);
        assert!(limiter.check_and_increment(&b, policy).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_reset_clears_bucket() {
        let (_clock, store, limiter) = limiter_at(WINDOW_START);
        let client = ClientKey::from_raw("example.com");
        let policy = policy(4, 60);

        for _ in 0..4 {
            limiter.check_and_increment(&client, policy).await.unwrap();
        }
        limiter.reset(&client).await.unwrap();

        assert!(store.is_empty());
        let verdict = limiter.check_and_increment(&client, policy).await.unwrap();
        assert_eq!(verdict.count, 1.0);
    }
}
