//! Redis backing store

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use super::errors::CacheResult;
use super::r#trait::CacheBackend;

/// Upper bound for a single reconnect delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Thin wrapper issuing one Redis command per cache operation.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    /// Connects with capped exponential backoff, giving up after `max_retries` retries.
    pub async fn connect(url: &str, max_retries: usize, retry_delay: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(retry_delay)
            .with_max_delay(MAX_RETRY_DELAY.max(retry_delay))
            .with_max_times(max_retries);

        let manager = (|| {
            let client = client.clone();
            async move { ConnectionManager::new(client).await }
        })
        .retry(backoff)
        .notify(|err: &redis::RedisError, delay: Duration| {
            warn!(error = %err, ?delay, "Redis connection failed, retrying");
        })
        .await?;

        info!("Connected to Redis cache");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn();
        Ok(redis::cmd("DEL").arg(key).query_async(&mut conn).await?)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?)
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCR").arg(key).query_async(&mut conn).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?)
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        let mut conn = self.conn();
        Ok(redis::cmd("TTL").arg(key).query_async(&mut conn).await?)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(redis::cmd("MGET").arg(keys).query_async(&mut conn).await?)
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn mdel(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        Ok(redis::cmd("DEL").arg(keys).query_async(&mut conn).await?)
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry
    (ttl.as_millis() as u64).max(1)
}
