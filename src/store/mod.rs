//! Counter store abstraction.
//!
//! The limiters keep all of their state in a [`CounterStore`]: a key/value
//! store with an atomic increment and per-key expiry. The store is always
//! injected, never reached through a global.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Errors surfaced by counter store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the command
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Backing store for rate limit counters.
///
/// Implementations must perform [`increment_by`](Self::increment_by) as a
/// single atomic read-modify-write; the limiters take no locks of their own.
/// An expired key reads as absent.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Add `amount` to a key and return the new value.
    ///
    /// A missing key is created holding `amount` and expiring after `ttl`;
    /// an existing key keeps its original expiry.
    async fn increment_by(&self, key: &str, amount: u64, ttl: Duration) -> Result<u64, StoreError>;

    /// Overwrite a value and its expiry.
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
