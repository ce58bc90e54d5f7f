//! HTTP middleware

pub mod auth;
pub mod extract_user;
pub mod guards;
pub mod rate_limit;

pub use auth::{authenticate, optional_auth};
pub use extract_user::{authenticate_request, client_ip, extract_token, request_meta, AuthContext};
pub use guards::{
    authorize, require_admin_permission, require_ownership, OwnerResolver, OwnershipGuard,
    PermissionGuard, RoleGuard, SUPER_PERMISSION,
};
pub use rate_limit::{auth_rate_limit, AuthRateLimit};
