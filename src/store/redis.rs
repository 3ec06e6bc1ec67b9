//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::{CounterStore, StoreError};

/// Increment and, only when the key was just created, attach its expiry.
const INCR_WITH_TTL: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if value == tonumber(ARGV[1]) then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

/// A [`CounterStore`] on a Redis server.
///
/// Redis evaluates expiry itself, so this store ignores the engine clock.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    incr_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    (ttl.as_millis() as u64).max(1)
}

impl RedisStore {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!("Connecting to Redis counter store");
        let client = Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        info!("Redis counter store connected");

        Ok(Self {
            conn,
            incr_script: Script::new(INCR_WITH_TTL),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(unavailable)
    }

    async fn increment_by(&self, key: &str, amount: u64, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: u64 = self
            .incr_script
            .key(key)
            .arg(amount)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(key = %key, value = value, "Incremented Redis counter");
        Ok(value)
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.pset_ex(key, value, ttl_millis(ttl))
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(unavailable)
    }
}
