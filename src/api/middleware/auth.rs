//! Authentication middleware
//!
//! ```ignore
//! Router::new()
//!     .route("/me", get(me))
//!     .route_layer(middleware::from_fn_with_state(service.clone(), authenticate));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use super::extract_user::authenticate_request;
use crate::auth::AuthService;

/// Rejects the request unless it carries a valid access token; on success the
/// [`AuthContext`](super::AuthContext) is available as an extension.
pub async fn authenticate(
    State(service): State<Arc<AuthService>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate_request(&service, req.headers()).await {
        Ok(context) => {
            req.extensions_mut().insert(context);
            next.run(req).await
        }
        Err(e) => {
            debug!(error = %e, path = %req.uri().path(), "Authentication failed");
            e.into_response()
        }
    }
}

/// Attaches the caller when the token is valid, otherwise continues anonymously
pub async fn optional_auth(
    State(service): State<Arc<AuthService>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate_request(&service, req.headers()).await {
        Ok(context) => {
            req.extensions_mut().insert(context);
        }
        Err(e) => debug!(error = %e, "Continuing unauthenticated"),
    }
    next.run(req).await
}
