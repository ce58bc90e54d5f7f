//! Cache store trait definition

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::errors::CacheResult;

/// `ttl()` result for a key that exists without an expiry.
pub const TTL_PERSISTENT: i64 = -1;
/// `ttl()` result for a key that does not exist.
pub const TTL_MISSING: i64 = -2;

/// Which store is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Redis,
    Memory,
}

/// Health report returned by [`CacheStore::health`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    /// `healthy` or `degraded`
    pub status: &'static str,
    pub mode: CacheMode,
    /// Number of keys held by the in-process map
    pub memory_keys: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// TTL-aware string key/value store shared by the rate limiter, token storage and blacklist.
///
/// `set`, `del` and `expire` are idempotent. `incr` on a missing key creates it at 1 with no
/// expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining seconds, [`TTL_PERSISTENT`] or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()>;

    async fn mdel(&self, keys: &[String]) -> CacheResult<u64>;

    /// Drops every key.
    async fn flush(&self) -> CacheResult<()>;

    async fn health(&self) -> CacheHealth;
}

/// Remote store behind [`Cache`](super::Cache).
///
/// Errors are returned as-is; the composite cache decides whether to fall back.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    async fn del(&self, key: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn incr(&self, key: &str) -> CacheResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()>;

    async fn mdel(&self, keys: &[String]) -> CacheResult<u64>;

    async fn flush(&self) -> CacheResult<()>;

    async fn ping(&self) -> CacheResult<()>;
}
