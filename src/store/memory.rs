//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{CounterStore, StoreError};
use crate::ratelimit::{BucketKey, Clock, SystemClock, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: u64,
    expires_at: Timestamp,
}

impl Slot {
    fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// Number of key creations between sweeps of expired slots.
const SWEEP_EVERY: u64 = 256;

/// A [`CounterStore`] held in a sharded concurrent map.
///
/// Expiry is checked lazily against the injected clock on every access.
/// Bucket keys carry their window start and are never written again once
/// expired, so every 256 key creations the store also drops expired slots
/// with [`purge_expired`](Self::purge_expired).
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    created: AtomicU64,
}

impl MemoryStore {
    /// Create a store that expires keys by wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that expires keys against the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            created: AtomicU64::new(0),
        }
    }

    fn expiry(&self, now: Timestamp, ttl: Duration) -> Timestamp {
        now.saturating_add(ttl.as_millis() as u64)
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before - self.slots.len()
    }

    /// Count a newly created key and sweep when due.
    ///
    /// Must not be called while a map guard is held.
    fn key_created(&self) {
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if created % SWEEP_EVERY == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed = removed, remaining = self.slots.len(), "Swept expired counters");
            }
        }
    }

    /// Number of slots held, expired or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live counter buckets with their values, marker keys excluded.
    pub fn buckets(&self) -> Vec<(BucketKey, u64)> {
        let now = self.clock.now();
        self.slots
            .iter()
            .filter(|e| e.value().is_live(now))
            .filter_map(|e| BucketKey::from_store_key(e.key()).map(|k| (k, e.value().value)))
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value))
    }

    async fn increment_by(&self, key: &str, amount: u64, ttl: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();

        // The entry guard holds the shard lock, making this read-modify-write atomic.
        let (value, created) = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_live(now) {
                    slot.value = slot.value.saturating_add(amount);
                } else {
                    *slot = Slot {
                        value: amount,
                        expires_at: self.expiry(now, ttl),
                    };
                }
                (slot.value, false)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: amount,
                    expires_at: self.expiry(now, ttl),
                });
                (amount, true)
            }
        };

        if created {
            self.key_created();
        }

        trace!(key = %key, value = value, "Incremented counter");
        Ok(value)
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let replaced = self.slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: self.expiry(now, ttl),
            },
        );
        if replaced.is_none() {
            self.key_created();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use futures::future::join_all;

    fn store_at(secs: u64) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::at_secs(secs));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_increment_creates_and_adds() {
        let (_clock, store) = store_at(1000);
        let ttl = Duration::from_secs(60);

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.increment_by("k", 1, ttl).await.unwrap(), 1);
        assert_eq!(store.increment_by("k", 3, ttl).await.unwrap(), 4);
        assert_eq!(store.get("k").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, store) = store_at(1000);
        store.increment_by("k", 1, Duration::from_secs(60)).await.unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(store.get("k").await.unwrap(), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);

        // Incrementing an expired key starts over with a fresh TTL
        assert_eq!(store.increment_by("k", 1, Duration::from_secs(60)).await.unwrap(), 1);
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_increment_keeps_original_expiry() {
        let (clock, store) = store_at(1000);
        store.increment_by("k", 1, Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        store.increment_by("k", 1, Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_delete() {
        let (_clock, store) = store_at(1000);
        store.set("k", 42, Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(42));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // Deleting again is a no-op
        tokio_test::assert_ok!(store.delete("k").await);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store_at(1000);
        store.set("short", 1, Duration::from_secs(1)).await.unwrap();
        store.set("long", 1, Duration::from_secs(100)).await.unwrap();
        assert_eq!(store.len(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_windows_are_swept() {
        let (clock, store) = store_at(1_000_000);
        let ttl = Duration::from_secs(1);

        for window in 0..1000u64 {
            let bucket = format!("rate-limit|fixed|c|{}", 1_000_000 + window);
            store.increment_by(&bucket, 1, ttl).await.unwrap();
            store.set(&format!("{}|expires_at", bucket), 1, ttl).await.unwrap();
            clock.advance(ttl);
        }

        assert!(store.is_empty());
        assert!(
            store.slot_count() <= SWEEP_EVERY as usize,
            "{} slots held",
            store.slot_count()
        );
    }

    #[tokio::test]
    async fn test_buckets_skip_markers() {
        let (_clock, store) = store_at(1000);
        let ttl = Duration::from_secs(60);
        store.increment_by("rate-limit|fixed|c|960", 2, ttl).await.unwrap();
        store.set("rate-limit|fixed|c|960|expires_at", 1020, ttl).await.unwrap();
        store.set("unrelated", 7, ttl).await.unwrap();

        let buckets = store.buckets();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0.client, "c");
        assert_eq!(buckets[0].0.window_start, 960);
        assert_eq!(buckets[0].1, 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let (_clock, store) = store_at(1000);
        let store = Arc::new(store);

        let tasks = (0..64).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.increment_by("hot", 1, Duration::from_secs(60)).await.unwrap()
            })
        });
        let mut seen: Vec<u64> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        seen.sort_unstable();

        assert_eq!(seen, (1..=64).collect::<Vec<_>>());
        assert_eq!(store.get("hot").await.unwrap(), Some(64));
    }
}
