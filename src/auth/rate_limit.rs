//! Cache-backed attempt counters
//!
//! Each key gets a counter that starts its window on the first hit. Independent of the
//! account lockout kept on the user record.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{config::RateLimitConfig, errors::AuthError};
use crate::cache::CacheStore;

/// Fixed-window attempt limiter
#[derive(Clone)]
pub struct AttemptLimiter {
    cache: Arc<dyn CacheStore>,
    prefix: String,
    max_attempts: u32,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(cache: Arc<dyn CacheStore>, prefix: impl Into<String>, config: &RateLimitConfig) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            max_attempts: config.max_attempts,
            window: config.window(),
        }
    }

    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fails with `TooManyRequests` once the counter has reached the limit
    pub async fn check(&self, identifier: &str) -> Result<(), AuthError> {
        let key = self.key(identifier);
        let count = match self.cache.get(&key).await? {
            Some(raw) => raw.parse::<u32>().unwrap_or(0),
            None => return Ok(()),
        };
        if count >= self.max_attempts {
            return Err(self.rejection(&key).await);
        }
        Ok(())
    }

    /// Adds one attempt and returns the new count
    pub async fn hit(&self, identifier: &str) -> Result<u32, AuthError> {
        let key = self.key(identifier);
        let count = self.cache.incr(&key).await?;
        if count == 1 {
            self.cache.expire(&key, self.window).await?;
        }
        debug!(%key, count, "Attempt recorded");
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Counts this request and rejects it when it goes over the limit
    pub async fn consume(&self, identifier: &str) -> Result<u32, AuthError> {
        let count = self.hit(identifier).await?;
        if count > self.max_attempts {
            let key = self.key(identifier);
            warn!(%key, count, "Rate limit exceeded");
            return Err(self.rejection(&key).await);
        }
        Ok(count)
    }

    pub async fn reset(&self, identifier: &str) -> Result<(), AuthError> {
        self.cache.del(&self.key(identifier)).await?;
        Ok(())
    }

    async fn rejection(&self, key: &str) -> AuthError {
        let retry_after_secs = match self.cache.ttl(key).await {
            Ok(ttl) if ttl > 0 => ttl as u64,
            _ => self.window.as_secs(),
        };
        AuthError::TooManyRequests { retry_after_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn limiter(max_attempts: u32) -> AttemptLimiter {
        AttemptLimiter::new(
            Arc::new(MemoryCache::new()),
            "login_attempts",
            &RateLimitConfig {
                max_attempts,
                window_secs: 60,
            },
        )
    }

    #[tokio::test]
    async fn test_check_blocks_at_limit() {
        let limiter = limiter(2);
        limiter.check("1.2.3.4:a@x.com").await.unwrap();
        limiter.hit("1.2.3.4:a@x.com").await.unwrap();
        limiter.check("1.2.3.4:a@x.com").await.unwrap();
        limiter.hit("1.2.3.4:a@x.com").await.unwrap();

        match limiter.check("1.2.3.4:a@x.com").await {
            Err(AuthError::TooManyRequests { retry_after_secs }) => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60)
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Other identifiers are unaffected
        limiter.check("1.2.3.4:b@x.com").await.unwrap();

        limiter.reset("1.2.3.4:a@x.com").await.unwrap();
        limiter.check("1.2.3.4:a@x.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_allows_up_to_limit() {
        let limiter = limiter(3);
        for expected in 1..=3 {
            assert_eq!(limiter.consume("ip").await.unwrap(), expected);
        }
        assert!(matches!(
            limiter.consume("ip").await,
            Err(AuthError::TooManyRequests { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expires() {
        let limiter = limiter(1);
        limiter.hit("ip").await.unwrap();
        assert!(limiter.check("ip").await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("ip").await.is_ok());
    }
}
