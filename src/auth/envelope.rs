//! Uniform success/error envelope for auth operations

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::errors::AuthError;

/// `{success:true,data}` or `{success:false,error}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip)]
    status: StatusCode,
}

/// Error half of the envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    /// Full error chain; only outside production
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn with_status(status: StatusCode, data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status,
        }
    }

    pub fn failure(error: &AuthError, expose_details: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: error.error_code(),
                message: error.message(),
                details: expose_details.then(|| format!("{error:?}")),
            }),
            status: error.status_code(),
        }
    }

    /// Wraps an operation result; `expose_details` is false in production
    pub fn from_result(result: Result<T, AuthError>, expose_details: bool) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                if e.is_server_error() {
                    tracing::error!(error = %e, "Auth operation failed");
                }
                Self::failure(&e, expose_details)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn created(mut self) -> Self {
        if self.success {
            self.status = StatusCode::CREATED;
        }
        self
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
