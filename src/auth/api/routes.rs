//! Auth routes

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use crate::api::middleware::{auth_rate_limit, authenticate, AuthRateLimit};
use crate::auth::AuthService;

/// Builds `/api/auth/*`
pub fn create_auth_routes(service: Arc<AuthService>) -> Router {
    let limit = AuthRateLimit::new(
        Arc::clone(service.cache()),
        &service.config().endpoint_rate_limit,
        service.config().trust_proxy_headers,
    );

    let limited = Router::new()
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/forgot-password", post(handlers::forgot_password))
        .route(
            "/api/auth/resend-verification",
            post(handlers::resend_verification),
        )
        .route_layer(from_fn_with_state(limit, auth_rate_limit));

    let authenticated = Router::new()
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/change-password", post(handlers::change_password))
        .route("/api/auth/me", get(handlers::me))
        .route_layer(from_fn_with_state(Arc::clone(&service), authenticate));

    Router::new()
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/reset-password", post(handlers::reset_password))
        .route("/api/auth/verify-email", post(handlers::verify_email))
        .merge(limited)
        .merge(authenticated)
        .with_state(service)
}
