//! Server-side token state kept in the cache
//!
//! | key                          | value                    | ttl                 |
//! |------------------------------|--------------------------|---------------------|
//! | `refresh_token:<user>`       | current refresh token    | refresh lifetime    |
//! | `reset_token:<user>`         | pending reset token      | reset lifetime      |
//! | `verification_token:<user>`  | pending verification     | verification lifetime |
//! | `blacklist:token:<sha256>`   | `1`                      | remaining lifetime  |
//! | `blacklist:jti:<jti>`        | `1`                      | remaining lifetime  |
//! | `device_session:<user>`      | JSON [`DeviceSession`]   | refresh lifetime    |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::token_service::{fingerprint, TokenType};
use crate::auth::errors::AuthError;
use crate::cache::CacheStore;

/// Last login context of a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub logged_in_at: DateTime<Utc>,
    /// `jti` of the refresh token issued with this login
    pub refresh_jti: String,
}

/// Single-slot token storage per subject plus the revocation list
#[derive(Clone)]
pub struct TokenStore {
    cache: Arc<dyn CacheStore>,
}

impl TokenStore {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    fn slot_key(token_type: TokenType, user_id: &str) -> String {
        match token_type {
            TokenType::Refresh => format!("refresh_token:{user_id}"),
            TokenType::Reset => format!("reset_token:{user_id}"),
            TokenType::Verification => format!("verification_token:{user_id}"),
            TokenType::Access => format!("access_token:{user_id}"),
        }
    }

    /// Stores `token` as the only live token of its type, replacing any previous one
    pub async fn save(
        &self,
        token_type: TokenType,
        user_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        self.cache
            .set(&Self::slot_key(token_type, user_id), token, Some(ttl))
            .await?;
        debug!(%user_id, %token_type, "Stored token");
        Ok(())
    }

    /// Constant-time comparison with the stored token; `false` when nothing is stored
    pub async fn matches(
        &self,
        token_type: TokenType,
        user_id: &str,
        token: &str,
    ) -> Result<bool, AuthError> {
        let stored = self.cache.get(&Self::slot_key(token_type, user_id)).await?;
        Ok(stored.is_some_and(|stored| bool::from(stored.as_bytes().ct_eq(token.as_bytes()))))
    }

    pub async fn remove(&self, token_type: TokenType, user_id: &str) -> Result<bool, AuthError> {
        let removed = self.cache.del(&Self::slot_key(token_type, user_id)).await?;
        Ok(removed > 0)
    }

    /// Revokes an access token until it would have expired anyway.
    ///
    /// Returns `false` without writing when `remaining` is not positive.
    pub async fn blacklist(&self, token: &str, jti: &str, remaining_secs: i64) -> Result<bool, AuthError> {
        if remaining_secs <= 0 {
            debug!(%jti, "Token already expired, not blacklisting");
            return Ok(false);
        }
        let ttl = Duration::from_secs(remaining_secs as u64);
        let entries = vec![
            (format!("blacklist:token:{}", fingerprint(token)), "1".to_string()),
            (format!("blacklist:jti:{jti}"), "1".to_string()),
        ];
        self.cache.mset(&entries, Some(ttl)).await?;
        info!(%jti, ttl_secs = remaining_secs, "Access token blacklisted");
        Ok(true)
    }

    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self
            .cache
            .exists(&format!("blacklist:token:{}", fingerprint(token)))
            .await?)
    }

    pub async fn is_jti_blacklisted(&self, jti: &str) -> Result<bool, AuthError> {
        Ok(self.cache.exists(&format!("blacklist:jti:{jti}")).await?)
    }

    pub async fn save_device_session(
        &self,
        user_id: &str,
        session: &DeviceSession,
        ttl: Duration,
    ) -> Result<(), AuthError> {
        let value = serde_json::to_string(session)
            .map_err(|e| AuthError::Internal(format!("device session encoding: {e}")))?;
        self.cache
            .set(&format!("device_session:{user_id}"), &value, Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn device_session(&self, user_id: &str) -> Result<Option<DeviceSession>, AuthError> {
        let Some(raw) = self.cache.get(&format!("device_session:{user_id}")).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(%user_id, error = %e, "Discarding unreadable device session");
                Ok(None)
            }
        }
    }

    pub async fn remove_device_session(&self, user_id: &str) -> Result<(), AuthError> {
        self.cache.del(&format!("device_session:{user_id}")).await?;
        Ok(())
    }

    /// Drops the refresh token and device session, forcing a fresh login everywhere
    pub async fn end_all_sessions(&self, user_id: &str) -> Result<(), AuthError> {
        let keys = vec![
            Self::slot_key(TokenType::Refresh, user_id),
            format!("device_session:{user_id}"),
        ];
        self.cache.mdel(&keys).await?;
        info!(%user_id, "Ended all sessions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> TokenStore {
        TokenStore::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn test_single_slot_per_subject() {
        let store = store();
        let ttl = Duration::from_secs(60);
        store.save(TokenType::Refresh, "u1", "first", ttl).await.unwrap();
        store.save(TokenType::Refresh, "u1", "second", ttl).await.unwrap();

        assert!(!store.matches(TokenType::Refresh, "u1", "first").await.unwrap());
        assert!(store.matches(TokenType::Refresh, "u1", "second").await.unwrap());
        // Types do not share a slot
        assert!(!store.matches(TokenType::Reset, "u1", "second").await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_skips_expired() {
        let store = store();
        assert!(!store.blacklist("tok", "jti-1", 0).await.unwrap());
        assert!(!store.is_blacklisted("tok").await.unwrap());

        assert!(store.blacklist("tok", "jti-1", 30).await.unwrap());
        assert!(store.is_blacklisted("tok").await.unwrap());
        assert!(store.is_jti_blacklisted("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_end_all_sessions() {
        let store = store();
        let ttl = Duration::from_secs(60);
        store.save(TokenType::Refresh, "u1", "rt", ttl).await.unwrap();
        let session = DeviceSession {
            ip: Some("10.0.0.1".to_string()),
            user_agent: None,
            logged_in_at: Utc::now(),
            refresh_jti: "j".to_string(),
        };
        store.save_device_session("u1", &session, ttl).await.unwrap();
        assert_eq!(store.device_session("u1").await.unwrap(), Some(session));

        store.end_all_sessions("u1").await.unwrap();

        assert!(!store.matches(TokenType::Refresh, "u1", "rt").await.unwrap());
        assert!(store.device_session("u1").await.unwrap().is_none());
    }
}
