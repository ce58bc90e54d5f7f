//! Auth error taxonomy

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;

/// Shared wording for "no such user" and "wrong password"
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

/// Auth error
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed or revoked credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked for {remaining_minutes} more minute(s)")]
    AccountLocked { remaining_minutes: i64 },

    #[error("Too many requests, retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Account already exists")]
    AccountAlreadyExists,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Email already verified")]
    EmailAlreadyVerified,

    /// Status is pending/rejected or the account is inactive
    #[error("Account pending approval or disabled")]
    AccountInactive,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Password verification failed: {0}")]
    Verification(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![message.into()])
    }

    /// HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_)
            | Self::TokenExpired
            | Self::InvalidToken
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,

            Self::Forbidden(_) | Self::EmailNotVerified | Self::AccountInactive => {
                StatusCode::FORBIDDEN
            }

            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::AccountAlreadyExists | Self::EmailAlreadyVerified => StatusCode::CONFLICT,

            Self::AccountNotFound | Self::NotFound(_) => StatusCode::NOT_FOUND,

            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,

            Self::Hashing(_)
            | Self::Verification(_)
            | Self::Storage(_)
            | Self::Cache(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for clients
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::TokenExpired => "token_expired",
            Self::InvalidToken => "invalid_token",
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::AccountAlreadyExists => "account_exists",
            Self::AccountNotFound => "account_not_found",
            Self::EmailNotVerified => "email_not_verified",
            Self::EmailAlreadyVerified => "email_already_verified",
            Self::AccountInactive => "account_inactive",
            Self::NotFound(_) => "not_found",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Hashing(_) | Self::Verification(_) => "credential_error",
            Self::Storage(_) => "storage_error",
            Self::Cache(_) => "cache_error",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "server_error",
        }
    }

    /// Client-facing message; internal failures never leak their cause here
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized(reason) => reason.clone(),
            Self::Forbidden(reason) => reason.clone(),
            Self::TokenExpired => "Token has expired".to_string(),
            Self::InvalidToken => "Invalid token".to_string(),
            Self::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE.to_string(),
            Self::AccountLocked { remaining_minutes } => format!(
                "Account is temporarily locked due to too many failed login attempts. Try again in {remaining_minutes} minute(s)"
            ),
            Self::TooManyRequests { retry_after_secs } => format!(
                "Too many attempts. Please try again in {} minute(s)",
                retry_after_secs.div_ceil(60).max(1)
            ),
            Self::AccountAlreadyExists => "An account with this email already exists".to_string(),
            Self::AccountNotFound => "Account not found".to_string(),
            Self::EmailNotVerified => "Please verify your email before logging in".to_string(),
            Self::EmailAlreadyVerified => "Email is already verified".to_string(),
            Self::AccountInactive => {
                "Your account is pending approval or has been disabled".to_string()
            }
            Self::NotFound(what) => format!("{what} not found"),
            Self::ValidationFailed(messages) => messages.join(". "),
            Self::Hashing(_)
            | Self::Verification(_)
            | Self::Storage(_)
            | Self::Cache(_)
            | Self::Config(_)
            | Self::Internal(_) => "Something went wrong, please try again later".to_string(),
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Middleware-style error body: `{status:"error", message, error}`
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, "Auth request failed");
        }
        let status = self.status_code();
        let mut response = (
            status,
            Json(json!({
                "status": "error",
                "message": self.message(),
                "error": self.error_code(),
            })),
        )
            .into_response();

        if let Self::TooManyRequests { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
