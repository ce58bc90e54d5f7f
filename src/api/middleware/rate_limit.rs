//! Per-identifier rate limiting for sensitive auth endpoints
//!
//! The identifier is the `email` field of a JSON body when present, otherwise the client IP.
//! Cache failures let the request through.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use super::extract_user::client_ip;
use crate::auth::{config::RateLimitConfig, errors::AuthError, rate_limit::AttemptLimiter};
use crate::cache::CacheStore;

/// Largest body inspected for the identifier
const MAX_INSPECTED_BODY: usize = 64 * 1024;

#[derive(Clone)]
pub struct AuthRateLimit {
    limiter: AttemptLimiter,
    trust_proxy: bool,
}

impl AuthRateLimit {
    pub fn new(cache: Arc<dyn CacheStore>, config: &RateLimitConfig, trust_proxy: bool) -> Self {
        Self {
            limiter: AttemptLimiter::new(cache, "auth_rate", config),
            trust_proxy,
        }
    }
}

fn body_email(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let email = value.get("email")?.as_str()?.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

pub async fn auth_rate_limit(
    State(limit): State<AuthRateLimit>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_INSPECTED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AuthError::validation("Request body too large").into_response();
        }
    };

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = body_email(&bytes)
        .or_else(|| client_ip(&parts.headers, peer, limit.trust_proxy).map(|ip| ip.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    match limit.limiter.consume(&identifier).await {
        Ok(_) => {}
        Err(e @ AuthError::TooManyRequests { .. }) => {
            warn!(path = %parts.uri.path(), "Auth endpoint rate limit hit");
            return e.into_response();
        }
        Err(e) => warn!(error = %e, "Rate limiter unavailable, allowing request"),
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_email() {
        assert_eq!(
            body_email(br#"{"email":" A@X.com ","password":"x"}"#).as_deref(),
            Some("a@x.com")
        );
        assert_eq!(body_email(br#"{"token":"abc"}"#), None);
        assert_eq!(body_email(b"not json"), None);
    }
}
