//! Key/value cache with a Redis backing store and an in-process fallback
//!
//! ```text
//! cache/
//! ├── trait.rs   # CacheStore contract
//! ├── errors.rs  # CacheError
//! ├── memory.rs  # in-process map with expiry timers
//! └── redis.rs   # Redis backend
//! ```
//!
//! [`Cache`] prefers Redis when one is configured and reachable. Any backend error is logged
//! and the operation is served from the in-process map instead, so a cache outage never
//! blocks authentication. Only [`CacheStore::health`] reports the degraded state.
//!
//! Fallback is decided per operation. A value written to memory during an outage is not
//! copied to Redis once it recovers, so later reads go back to Redis and miss it. `exists`
//! checks both stores, which keeps blacklist entries recorded during an outage effective.

pub mod errors;
pub mod memory;
pub mod redis;
pub mod r#trait;

pub use errors::{CacheError, CacheResult};
pub use memory::MemoryCache;
pub use r#trait::{
    CacheBackend, CacheHealth, CacheMode, CacheStore, TTL_MISSING, TTL_PERSISTENT,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use self::redis::RedisBackend;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL; `None` runs in-process only
    pub url: Option<String>,

    /// Connection retries before switching to in-process mode for good
    pub max_retries: usize,

    /// Base delay between connection attempts (milliseconds)
    pub retry_delay_ms: u64,

    /// Skip Redis even when a URL is configured
    pub force_memory: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: 3,
            retry_delay_ms: 200,
            force_memory: false,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            max_retries: std::env::var("REDIS_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay_ms: std::env::var("REDIS_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.retry_delay_ms),
            force_memory: std::env::var("USE_MEMORY_CACHE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.force_memory),
        }
    }
}

/// Composite cache: Redis when available, in-process map otherwise.
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    fallback: MemoryCache,
    /// Set after the first backend failure, cleared by a successful health check
    degraded: AtomicBool,
}

impl Cache {
    /// Builds the cache described by `config`.
    ///
    /// Never fails: when Redis cannot be reached after the configured retries the instance
    /// runs in-process for the rest of its life.
    pub async fn connect(config: &CacheConfig) -> Self {
        let url = match (&config.url, config.force_memory) {
            (Some(url), false) => url,
            (_, true) => {
                info!("In-memory cache forced by configuration");
                return Self::in_memory();
            }
            (None, false) => {
                info!("No cache URL configured, using in-memory cache");
                return Self::in_memory();
            }
        };

        let delay = Duration::from_millis(config.retry_delay_ms);
        match RedisBackend::connect(url, config.max_retries, delay).await {
            Ok(backend) => Self::with_backend(Arc::new(backend)),
            Err(e) => {
                warn!(
                    error = %e,
                    retries = config.max_retries,
                    "Redis unreachable, switching to in-memory cache"
                );
                Self::in_memory()
            }
        }
    }

    /// Cache over an already connected remote store
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            fallback: MemoryCache::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: None,
            fallback: MemoryCache::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> CacheMode {
        if self.backend.is_some() {
            CacheMode::Redis
        } else {
            CacheMode::Memory
        }
    }

    /// Flushes the in-process map and cancels its expiry timers.
    pub async fn disconnect(&self) {
        self.fallback.clear();
        info!("Cache disconnected");
    }

    async fn run<T, Fut>(
        &self,
        op: &'static str,
        key: &str,
        remote: impl FnOnce(Arc<dyn CacheBackend>) -> Fut,
        local: impl FnOnce(&MemoryCache) -> CacheResult<T>,
    ) -> CacheResult<T>
    where
        Fut: Future<Output = CacheResult<T>>,
    {
        if let Some(backend) = &self.backend {
            match remote(Arc::clone(backend)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !self.degraded.swap(true, Ordering::Relaxed) {
                        warn!(op, key, error = %e, "Cache backend failed, using in-memory fallback");
                    }
                }
            }
        }
        local(&self.fallback)
    }
}

#[async_trait]
impl CacheStore for Cache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.run("get", key, |r| async move { r.get(key).await }, |m| Ok(m.get_value(key)))
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.run(
            "set",
            key,
            |r| async move { r.set(key, value, ttl).await },
            |m| {
                m.set_value(key, value, ttl);
                Ok(())
            },
        )
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        self.run("del", key, |r| async move { r.del(key).await }, |m| Ok(m.del_value(key)))
            .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let found = self
            .run(
                "exists",
                key,
                |r| async move { r.exists(key).await },
                |m| Ok(m.exists_value(key)),
            )
            .await?;
        Ok(found || self.fallback.exists_value(key))
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.run("incr", key, |r| async move { r.incr(key).await }, |m| m.incr_value(key))
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.run(
            "expire",
            key,
            |r| async move { r.expire(key, ttl).await },
            |m| Ok(m.expire_value(key, ttl)),
        )
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        self.run("ttl", key, |r| async move { r.ttl(key).await }, |m| Ok(m.ttl_value(key)))
            .await
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.run(
            "mget",
            "*",
            |r| async move { r.mget(keys).await },
            |m| Ok(m.mget_values(keys)),
        )
        .await
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()> {
        self.run(
            "mset",
            "*",
            |r| async move { r.mset(entries, ttl).await },
            |m| {
                m.mset_values(entries, ttl);
                Ok(())
            },
        )
        .await
    }

    async fn mdel(&self, keys: &[String]) -> CacheResult<u64> {
        self.run(
            "mdel",
            "*",
            |r| async move { r.mdel(keys).await },
            |m| Ok(m.mdel_values(keys)),
        )
        .await
    }

    async fn flush(&self) -> CacheResult<()> {
        // Both stores are cleared so no stale fallback entry survives a flush
        self.fallback.clear();
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.flush().await {
                self.degraded.store(true, Ordering::Relaxed);
                warn!(error = %e, "Cache backend flush failed");
            }
        }
        Ok(())
    }

    async fn health(&self) -> CacheHealth {
        let memory_keys = self.fallback.len();
        let Some(backend) = &self.backend else {
            return CacheHealth {
                status: "healthy",
                mode: CacheMode::Memory,
                memory_keys,
                detail: None,
            };
        };

        match backend.ping().await {
            Ok(()) => {
                self.degraded.store(false, Ordering::Relaxed);
                CacheHealth {
                    status: "healthy",
                    mode: CacheMode::Redis,
                    memory_keys,
                    detail: None,
                }
            }
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                CacheHealth {
                    status: "degraded",
                    mode: CacheMode::Redis,
                    memory_keys,
                    detail: Some(format!("backend unreachable, serving from memory: {e}")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Remote store that can be switched off to simulate an outage
    #[derive(Default)]
    struct FlakyBackend {
        down: AtomicBool,
        store: MemoryCache,
    }

    impl FlakyBackend {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn available(&self) -> CacheResult<()> {
            if self.down.load(Ordering::SeqCst) {
                let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "backend down");
                return Err(CacheError::Backend(::redis::RedisError::from(io)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            self.available()?;
            Ok(self.store.get_value(key))
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
            self.available()?;
            self.store.set_value(key, value, ttl);
            Ok(())
        }

        async fn del(&self, key: &str) -> CacheResult<u64> {
            self.available()?;
            Ok(self.store.del_value(key))
        }

        async fn exists(&self, key: &str) -> CacheResult<bool> {
            self.available()?;
            Ok(self.store.exists_value(key))
        }

        async fn incr(&self, key: &str) -> CacheResult<i64> {
            self.available()?;
            self.store.incr_value(key)
        }

        async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
            self.available()?;
            Ok(self.store.expire_value(key, ttl))
        }

        async fn ttl(&self, key: &str) -> CacheResult<i64> {
            self.available()?;
            Ok(self.store.ttl_value(key))
        }

        async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
            self.available()?;
            Ok(self.store.mget_values(keys))
        }

        async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()> {
            self.available()?;
            self.store.mset_values(entries, ttl);
            Ok(())
        }

        async fn mdel(&self, keys: &[String]) -> CacheResult<u64> {
            self.available()?;
            Ok(self.store.mdel_values(keys))
        }

        async fn flush(&self) -> CacheResult<()> {
            self.available()?;
            self.store.clear();
            Ok(())
        }

        async fn ping(&self) -> CacheResult<()> {
            self.available()
        }
    }

    #[tokio::test]
    async fn test_healthy_backend_serves_requests() {
        let backend = Arc::new(FlakyBackend::default());
        let cache = Cache::with_backend(backend.clone());

        cache.set("k", "v", None).await.unwrap();

        assert_eq!(cache.mode(), CacheMode::Redis);
        assert_eq!(backend.store.get_value("k"), Some("v".to_string()));
        assert!(cache.fallback.is_empty());
        assert!(cache.health().await.is_healthy());
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_memory() {
        let backend = Arc::new(FlakyBackend::default());
        backend.set_down(true);
        let cache = Cache::with_backend(backend.clone());

        cache.set("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.incr("hits").await.unwrap(), 1);
        assert_eq!(cache.incr("hits").await.unwrap(), 2);
        assert!(cache.ttl("k").await.unwrap() > 0);
        assert!(backend.store.is_empty());

        let health = cache.health().await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.mode, CacheMode::Redis);
        assert_eq!(health.memory_keys, 2);
        assert!(health.detail.is_some());

        backend.set_down(false);
        assert!(cache.health().await.is_healthy());
    }

    #[tokio::test]
    async fn test_exists_sees_keys_written_during_outage() {
        let backend = Arc::new(FlakyBackend::default());
        let cache = Cache::with_backend(backend.clone());

        backend.set_down(true);
        cache
            .set("blacklist:jti:abc", "1", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        backend.set_down(false);

        // Reads go back to the backend, which never saw the write
        assert_eq!(cache.get("blacklist:jti:abc").await.unwrap(), None);
        assert!(cache.exists("blacklist:jti:abc").await.unwrap());
        assert!(!cache.exists("blacklist:jti:other").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        let cache = Cache::connect(&CacheConfig::default()).await;
        assert_eq!(cache.mode(), CacheMode::Memory);

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.health().await.is_healthy());
    }

    #[tokio::test]
    async fn test_force_memory_ignores_url() {
        let config = CacheConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            force_memory: true,
            ..Default::default()
        };
        let cache = Cache::connect(&config).await;
        assert_eq!(cache.mode(), CacheMode::Memory);
    }

    #[tokio::test]
    async fn test_invalid_url_falls_back_to_memory() {
        let config = CacheConfig {
            url: Some("not a redis url".to_string()),
            max_retries: 0,
            retry_delay_ms: 1,
            force_memory: false,
        };
        let cache = Cache::connect(&config).await;

        assert_eq!(cache.mode(), CacheMode::Memory);
        assert_eq!(cache.incr("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_timers() {
        let cache = Cache::in_memory();
        cache.set("a", "1", Some(Duration::from_secs(60))).await.unwrap();
        cache.set("b", "2", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(cache.fallback.pending_timers(), 2);

        cache.disconnect().await;

        assert_eq!(cache.fallback.pending_timers(), 0);
        assert_eq!(cache.get("a").await.unwrap(), None);
    }
}
