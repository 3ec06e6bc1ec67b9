//! Client identity and counter key generation.

use std::fmt;

use super::policy::Mode;
use super::window::WindowId;

/// Identifies the subject being rate limited.
///
/// Usually built from a scope, a route and the requesting client
/// (`scope:route:client`), but any string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Build a key from its scope, route and client parts.
    pub fn new(scope: &str, route: &str, client: &str) -> Self {
        Self(format!("{}:{}:{}", scope, route, client))
    }

    /// Use an already-composed key as is.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::from_raw(key)
    }
}

/// Suffix appended to a bucket key to form its expiry marker key.
const MARKER_SUFFIX: &str = "expires_at";

/// Key of one counter bucket in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Namespace shared by every key the engine writes.
    pub prefix: String,
    /// The limiter that owns the bucket.
    pub mode: Mode,
    /// The rate limited subject (serialized).
    pub client: String,
    /// Window start, in epoch seconds.
    pub window_start: u64,
}

impl BucketKey {
    pub fn new(prefix: &str, mode: Mode, client: &ClientKey, window: WindowId) -> Self {
        Self {
            prefix: prefix.to_string(),
            mode,
            client: client.as_str().to_string(),
            window_start: window.start,
        }
    }

    /// Convert to a store key string.
    /// Format: "{prefix}|{mode}|{client}|{window_start}"
    /// Clients may contain ':' so '|' is the delimiter.
    pub fn to_store_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.prefix, self.mode, self.client, self.window_start
        )
    }

    /// Key of the companion value recording when this bucket's window ends.
    pub fn marker_key(&self) -> String {
        format!("{}|{}", self.to_store_key(), MARKER_SUFFIX)
    }

    /// Parse a bucket key back from its store form.
    ///
    /// Returns `None` for marker keys and anything not written by
    /// [`to_store_key`](Self::to_store_key).
    pub fn from_store_key(key: &str) -> Option<Self> {
        // Split from the right so clients containing the delimiter survive.
        let (rest, window) = key.rsplit_once('|')?;
        let window_start: u64 = window.parse().ok()?;

        let (prefix, rest) = rest.split_once('|')?;
        let (mode, client) = rest.split_once('|')?;
        let mode = mode.parse().ok()?;

        Some(Self {
            prefix: prefix.to_string(),
            mode,
            client: client.to_string(),
            window_start,
        })
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_store_key())
    }
}

/// Default namespace for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "rate-limit";

/// Builds every store key the limiters use under one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bucket(&self, mode: Mode, client: &ClientKey, window: WindowId) -> BucketKey {
        BucketKey::new(&self.prefix, mode, client, window)
    }

    /// Key remembering the window length last used for a client, so that a
    /// reset can locate its buckets without being handed the policy.
    pub fn window_index_key(&self, mode: Mode, client: &ClientKey) -> String {
        format!("{}|{}|{}|window_secs", self.prefix, mode, client)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
