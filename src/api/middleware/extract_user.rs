//! Caller extraction: bearer token, client IP and the authentication pipeline

use axum::http::{header, HeaderMap};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

use crate::auth::{
    core::{Claims, TokenType},
    errors::AuthError,
    storage::FindOptions,
    types::{Identity, RequestMeta, UserStatus},
    AuthService,
};

/// Authenticated caller stored in the request extensions
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: Identity,
    /// Raw access token, needed to blacklist it on logout
    pub token: String,
    pub claims: Claims,
}

/// Token from `Authorization: Bearer <token>` or a bare `Authorization: <token>`
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Client IP.
///
/// Proxy headers are only read when `trust_proxy` is set, taking the rightmost
/// `X-Forwarded-For` entry (added by the last proxy) and ignoring private addresses.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(ip) = forwarded
                .split(',')
                .last()
                .and_then(|last| last.trim().parse::<IpAddr>().ok())
            {
                if !is_private_ip(&ip) {
                    return Some(ip);
                }
                warn!("Suspicious X-Forwarded-For with private IP: {}", forwarded);
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
                if !is_private_ip(&ip) {
                    return Some(ip);
                }
                warn!("Suspicious X-Real-IP with private IP: {}", real_ip);
            }
        }
    } else if headers.contains_key("x-forwarded-for") {
        debug!("Ignoring X-Forwarded-For (TRUST_PROXY_HEADERS not set)");
    }

    peer.map(|addr| addr.ip())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_documentation()
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ((ipv6.segments()[0] & 0xfe00) == 0xfc00) // ULA
        }
    }
}

pub fn request_meta(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> RequestMeta {
    RequestMeta {
        ip: client_ip(headers, peer, trust_proxy).map(|ip| ip.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Runs the authentication pipeline, stopping at the first failure:
///
/// 1. bearer token present
/// 2. token not blacklisted
/// 3. signature, claims and expiry valid for an access token
/// 4. subject exists, is not deleted, is active and approved
pub async fn authenticate_request(
    service: &AuthService,
    headers: &HeaderMap,
) -> Result<AuthContext, AuthError> {
    let token = extract_token(headers)
        .ok_or_else(|| AuthError::Unauthorized("Authentication token is required".to_string()))?;

    let store = service.token_store();
    if store.is_blacklisted(&token).await? {
        return Err(AuthError::Unauthorized("Token has been revoked".to_string()));
    }

    let claims = service.tokens().verify_as(&token, TokenType::Access)?;
    if store.is_jti_blacklisted(&claims.jti).await? {
        return Err(AuthError::Unauthorized("Token has been revoked".to_string()));
    }

    let user = service
        .users()
        .find_by_id(&claims.sub, FindOptions::including_deleted())
        .await?
        .ok_or_else(|| AuthError::Unauthorized("User not found".to_string()))?;

    if user.is_deleted() {
        return Err(AuthError::Unauthorized("Account no longer exists".to_string()));
    }
    if !user.is_active {
        return Err(AuthError::Forbidden("Account is deactivated".to_string()));
    }
    match user.status {
        UserStatus::Approved => {}
        UserStatus::Pending => {
            return Err(AuthError::Forbidden("Account is pending approval".to_string()))
        }
        UserStatus::Rejected => {
            return Err(AuthError::Forbidden("Account has been rejected".to_string()))
        }
    }

    debug!(user_id = %user.id, "Request authenticated");
    Ok(AuthContext {
        identity: user.identity(),
        token,
        claims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_token_forms() {
        assert_eq!(
            extract_token(&headers(&[("authorization", "Bearer abc.def")])).as_deref(),
            Some("abc.def")
        );
        assert_eq!(
            extract_token(&headers(&[("authorization", "abc.def")])).as_deref(),
            Some("abc.def")
        );
        assert_eq!(extract_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_proxy_headers_need_trust() {
        let peer: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        let map = headers(&[("x-forwarded-for", "1.1.1.1, 8.8.8.8")]);

        assert_eq!(
            client_ip(&map, Some(peer), false),
            Some("10.0.0.5".parse().unwrap())
        );
        assert_eq!(
            client_ip(&map, Some(peer), true),
            Some("8.8.8.8".parse().unwrap())
        );
    }

    #[test]
    fn test_private_forwarded_ip_ignored() {
        let map = headers(&[("x-forwarded-for", "192.168.1.10")]);
        assert_eq!(client_ip(&map, None, true), None);
    }

    #[test]
    fn test_request_meta() {
        let map = headers(&[("user-agent", "curl/8.0")]);
        let meta = request_meta(&map, Some("9.9.9.9:1".parse().unwrap()), false);
        assert_eq!(meta.ip.as_deref(), Some("9.9.9.9"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
    }
}
