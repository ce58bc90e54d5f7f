//! HTTP application: auth routes, health check and shared middleware

pub mod middleware;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{api::create_auth_routes, AuthService};
use crate::cache::CacheHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub cache: CacheHealth,
}

/// Reports `degraded` when the cache is serving from its fallback
pub async fn health(State(service): State<Arc<AuthService>>) -> Json<HealthResponse> {
    let cache = service.cache().health().await;
    Json(HealthResponse {
        status: if cache.is_healthy() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        cache,
    })
}

/// Full application router
pub fn create_router(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .with_state(Arc::clone(&service))
        .merge(create_auth_routes(service))
        .layer(TraceLayer::new_for_http())
}
