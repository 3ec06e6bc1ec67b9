//! Limiter trait and the state shared by both window algorithms.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::clock::{Clock, Timestamp};
use super::key::{ClientKey, Keyspace};
use super::policy::{Mode, Policy};
use super::verdict::{Status, Verdict};
use super::window::WindowId;
use crate::store::{CounterStore, StoreError};

/// Trait for window limiter implementations.
///
/// This trait abstracts over the fixed and sliding window limiters so the
/// decision engine can dispatch on [`Mode`].
#[async_trait]
pub trait WindowLimiter: Send + Sync {
    /// The algorithm this limiter implements.
    fn mode(&self) -> Mode;

    /// Count one request against the client and decide whether it is admitted.
    async fn record(&self, client: &ClientKey, policy: Policy) -> Result<Verdict, StoreError>;

    /// Report the client's current usage without counting a request.
    async fn status(&self, client: &ClientKey, policy: Policy) -> Result<Status, StoreError>;

    /// Delete every counter and marker the limiter holds for the client.
    async fn reset(&self, client: &ClientKey) -> Result<(), StoreError>;
}

/// Store, clock and key layout a limiter works against.
#[derive(Clone)]
pub struct Counters {
    pub(crate) store: Arc<dyn CounterStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) keyspace: Keyspace,
}

impl Counters {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, keyspace: Keyspace) -> Self {
        Self {
            store,
            clock,
            keyspace,
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Remember the window length a client was last limited with.
    ///
    /// The index outlives every bucket written under it: fixed buckets live
    /// for one window and sliding buckets for at most two.
    pub(crate) async fn remember_window(
        &self,
        mode: Mode,
        client: &ClientKey,
        policy: Policy,
    ) -> Result<(), StoreError> {
        let key = self.keyspace.window_index_key(mode, client);
        let ttl = Duration::from_secs(policy.window_secs().saturating_mul(2));
        self.store.set(&key, policy.window_secs(), ttl).await
    }

    /// Delete the current and previous buckets, their markers and the index.
    ///
    /// Without an index entry every bucket has already expired, so there is
    /// nothing to delete.
    pub(crate) async fn reset_windows(&self, mode: Mode, client: &ClientKey) -> Result<(), StoreError> {
        let index_key = self.keyspace.window_index_key(mode, client);
        let Some(window_secs) = self.store.get(&index_key).await? else {
            debug!(client = %client, mode = %mode, "Nothing to reset");
            return Ok(());
        };
        if window_secs == 0 {
            return self.store.delete(&index_key).await;
        }

        let current = WindowId::containing(self.now(), window_secs);
        let mut keys = Vec::with_capacity(5);
        for window in [current, current.previous()] {
            let bucket = self.keyspace.bucket(mode, client, window);
            keys.push(bucket.to_store_key());
            keys.push(bucket.marker_key());
        }
        keys.push(index_key);

        try_join_all(keys.iter().map(|key| self.store.delete(key))).await?;
        debug!(client = %client, mode = %mode, keys = keys.len(), "Deleted window counters");
        Ok(())
    }
}
