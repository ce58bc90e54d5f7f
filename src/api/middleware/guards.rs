//! Authorization guards layered after [`authenticate`](super::authenticate)
//!
//! Each guard is a small state value handed to `from_fn_with_state`:
//!
//! ```ignore
//! .route_layer(from_fn_with_state(RoleGuard::new([Role::Admin]), authorize))
//! .route_layer(from_fn_with_state(service.clone(), authenticate))
//! ```

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::extract_user::AuthContext;
use crate::auth::{errors::AuthError, types::Role, AuthService};

/// Permission that grants every admin permission
pub const SUPER_PERMISSION: &str = "super";

fn caller(req: &Request) -> Result<AuthContext, AuthError> {
    req.extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or_else(|| AuthError::Unauthorized("Authentication required".to_string()))
}

/// Allowed roles
#[derive(Debug, Clone)]
pub struct RoleGuard {
    roles: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn check(&self, role: Role) -> Result<(), AuthError> {
        if self.roles.contains(&role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "Role '{role}' is not allowed to access this resource"
            )))
        }
    }
}

pub async fn authorize(State(guard): State<RoleGuard>, req: Request, next: Next) -> Response {
    let result = caller(&req).and_then(|context| guard.check(context.identity.role));
    match result {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Finds who owns the resource a request targets
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// Owner id, `None` when the resource does not exist
    async fn owner_of(&self, parts: &Parts) -> Result<Option<String>, AuthError>;
}

#[derive(Clone)]
pub struct OwnershipGuard {
    resolver: Arc<dyn OwnerResolver>,
    resource: &'static str,
}

impl OwnershipGuard {
    pub fn new(resource: &'static str, resolver: Arc<dyn OwnerResolver>) -> Self {
        Self { resolver, resource }
    }
}

/// Admins pass; anyone else must own the resource
pub async fn require_ownership(
    State(guard): State<OwnershipGuard>,
    req: Request,
    next: Next,
) -> Response {
    let context = match caller(&req) {
        Ok(context) => context,
        Err(e) => return e.into_response(),
    };
    if context.identity.role == Role::Admin {
        debug!(user_id = %context.identity.id, "Admin bypasses ownership check");
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let owner = match guard.resolver.owner_of(&parts).await {
        Ok(owner) => owner,
        Err(e) => return e.into_response(),
    };
    match owner {
        None => AuthError::NotFound(guard.resource.to_string()).into_response(),
        Some(owner) if owner == context.identity.id => {
            next.run(Request::from_parts(parts, body)).await
        }
        Some(_) => {
            warn!(user_id = %context.identity.id, path = %parts.uri.path(), "Ownership check failed");
            AuthError::Forbidden(format!("You do not have access to this {}", guard.resource))
                .into_response()
        }
    }
}

/// Admin permissions, any one of which is enough
#[derive(Clone)]
pub struct PermissionGuard {
    service: Arc<AuthService>,
    required: Arc<[String]>,
}

impl PermissionGuard {
    pub fn new<I, S>(service: Arc<AuthService>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            service,
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    pub async fn check(&self, context: &AuthContext) -> Result<(), AuthError> {
        if context.identity.role != Role::Admin {
            return Err(AuthError::Forbidden("Admin access required".to_string()));
        }
        let granted = self
            .service
            .users()
            .admin_permissions(&context.identity.id)
            .await?;
        if granted.iter().any(|p| p == SUPER_PERMISSION) {
            return Ok(());
        }
        if self.required.iter().any(|needed| granted.contains(needed)) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "Missing permission: {}",
                self.required.join(" or ")
            )))
        }
    }
}

pub async fn require_admin_permission(
    State(guard): State<PermissionGuard>,
    req: Request,
    next: Next,
) -> Response {
    let context = match caller(&req) {
        Ok(context) => context,
        Err(e) => return e.into_response(),
    };
    match guard.check(&context).await {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
