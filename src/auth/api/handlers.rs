//! HTTP handlers (thin)
//!
//! Each handler unpacks the request, calls [`AuthService`] and wraps the outcome in an
//! [`Envelope`].

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, State},
    http::HeaderMap,
    Extension,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::middleware::{request_meta, AuthContext};
use crate::auth::{envelope::Envelope, errors::AuthError, types::*, AuthService};

/// Turns body rejections into validation errors so they share the envelope
fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AuthError::validation(rejection.body_text()))
}

fn respond<T>(service: &AuthService, result: Result<T, AuthError>) -> Envelope<T> {
    Envelope::from_result(result, service.config().expose_error_details())
}

pub async fn register(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Envelope<AuthResponse> {
    let result = match payload(body) {
        Ok(req) => {
            info!(email = %req.email, "API: registration request");
            service.register(req).await
        }
        Err(e) => Err(e),
    };
    respond(&service, result).created()
}

pub async fn login(
    State(service): State<Arc<AuthService>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Envelope<AuthResponse> {
    let meta = request_meta(
        &headers,
        connect.map(|ConnectInfo(addr)| addr),
        service.config().trust_proxy_headers,
    );
    let result = match payload(body) {
        Ok(req) => service.login(req, meta).await,
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn refresh(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Envelope<TokenPair> {
    let result = match payload(body) {
        Ok(req) => service.refresh_token(req).await,
        Err(e) => Err(e),
    };
    respond(&service, result)
}

/// Body is optional: `{ "refresh_token": "..." }`
pub async fn logout(
    State(service): State<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    body: Option<Json<LogoutRequest>>,
) -> Envelope<MessageResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let response = service
        .logout(
            &context.identity.id,
            req.refresh_token.as_deref(),
            Some(&context.token),
        )
        .await;
    Envelope::ok(response)
}

pub async fn forgot_password(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<PasswordResetRequest>, JsonRejection>,
) -> Envelope<MessageResponse> {
    let result = match payload(body) {
        Ok(req) => Ok(service.request_password_reset(req).await),
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn reset_password(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Envelope<MessageResponse> {
    let result = match payload(body) {
        Ok(req) => service.reset_password(req).await,
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn verify_email(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Envelope<MessageResponse> {
    let result = match payload(body) {
        Ok(req) => service.verify_email(req).await,
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn resend_verification(
    State(service): State<Arc<AuthService>>,
    body: Result<Json<ResendVerificationRequest>, JsonRejection>,
) -> Envelope<MessageResponse> {
    let result = match payload(body) {
        Ok(req) => Ok(service.resend_verification(req).await),
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn change_password(
    State(service): State<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Envelope<MessageResponse> {
    let result = match payload(body) {
        Ok(req) => service.change_password(&context.identity.id, req).await,
        Err(e) => Err(e),
    };
    respond(&service, result)
}

pub async fn me(
    State(service): State<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
) -> Envelope<PublicUser> {
    let result = service.current_user(&context.identity.id).await;
    respond(&service, result)
}
