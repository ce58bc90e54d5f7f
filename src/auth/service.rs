//! Authentication service (facade)
//!
//! Owns every credential flow: register, login, refresh, logout, password reset, email
//! verification and password change. Collaborators are injected at construction.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{
    config::AuthConfig,
    core::{DeviceSession, ExtraClaims, PasswordService, TokenService, TokenStore, TokenType},
    errors::AuthError,
    lockout::{FailureOutcome, LockoutPolicy},
    notifier::{Notification, Notifier, TracingNotifier},
    rate_limit::AttemptLimiter,
    storage::{
        FindOptions, NewUser, ProfileRegistry, SessionFactory, UnitOfWork, UserPatch,
        UserRepository,
    },
    types::*,
};
use crate::cache::CacheStore;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("Hardcoded regex should always compile")
});

pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";
pub const VERIFICATION_RESENT_MESSAGE: &str =
    "If the account exists and is not yet verified, a new verification email has been sent";

const BEARER: &str = "Bearer";

/// Authentication service
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionFactory>,
    profiles: ProfileRegistry,
    tokens: Arc<TokenService>,
    passwords: Arc<PasswordService>,
    token_store: TokenStore,
    lockout: LockoutPolicy,
    login_limiter: AttemptLimiter,
    notifier: Arc<dyn Notifier>,
    cache: Arc<dyn CacheStore>,
    config: AuthConfig,
}

impl AuthService {
    /// # Errors
    /// `AuthError::Config` when the configuration cannot sign tokens
    pub fn new<S>(config: AuthConfig, store: Arc<S>, cache: Arc<dyn CacheStore>) -> Result<Self, AuthError>
    where
        S: UserRepository + SessionFactory + 'static,
    {
        config.validate()?;
        let tokens = Arc::new(TokenService::new(&config.jwt, config.ignore_expiration())?);
        let passwords = Arc::new(PasswordService::new(config.password.clone()));

        Ok(Self {
            users: store.clone(),
            sessions: store,
            profiles: ProfileRegistry::default(),
            tokens,
            passwords,
            token_store: TokenStore::new(Arc::clone(&cache)),
            lockout: LockoutPolicy::new(&config.lockout),
            login_limiter: AttemptLimiter::new(
                Arc::clone(&cache),
                "login_attempts",
                &config.login_rate_limit,
            ),
            notifier: Arc::new(TracingNotifier),
            cache,
            config,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Register a new account
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let email = normalize_email(&req.email);
        info!(%email, role = %req.role, "Processing registration");

        let mut problems = Vec::new();
        if !is_valid_email(&email) {
            problems.push("Email address is invalid".to_string());
        }
        if !req.role.is_self_registrable() {
            problems.push(format!("Role '{}' cannot be chosen at registration", req.role));
        }
        if let Err(AuthError::ValidationFailed(password_problems)) =
            self.passwords.validate_strength(&req.password)
        {
            problems.extend(password_problems);
        }
        if !problems.is_empty() {
            return Err(AuthError::ValidationFailed(problems));
        }

        if self
            .users
            .find_by_email(&email, FindOptions::including_deleted())
            .await?
            .is_some()
        {
            return Err(AuthError::AccountAlreadyExists);
        }

        let profile_repository = self.profiles.for_role(req.role)?;
        let password_hash = self.passwords.hash(&req.password).await?;

        let mut session = self.sessions.start_session().await?;
        let result = async {
            let user = session
                .create_user(NewUser {
                    email: email.clone(),
                    password_hash,
                    role: req.role,
                    status: self.config.initial_status,
                })
                .await?;
            profile_repository
                .create_profile(session.as_mut(), &user.id, req.profile)
                .await?;

            let verification_token =
                self.tokens
                    .issue(&user.id, user.role, TokenType::Verification, None)?;
            self.token_store
                .save(
                    TokenType::Verification,
                    &user.id,
                    &verification_token,
                    self.tokens.lifetime(TokenType::Verification),
                )
                .await?;
            let (access_token, refresh_token, _) = self.issue_pair(&user).await?;

            session.commit().await?;
            Ok::<_, AuthError>((user, verification_token, access_token, refresh_token))
        }
        .await;

        let (user, verification_token, access_token, refresh_token) = match result {
            Ok(created) => created,
            Err(e) => {
                session.abort().await;
                warn!(%email, error = %e, "Registration rolled back");
                return Err(e);
            }
        };

        info!(user_id = %user.id, "User registered");
        self.notifier.notify(&user.email, Notification::Welcome).await;
        self.notifier
            .notify(
                &user.email,
                Notification::Verification {
                    token: verification_token,
                },
            )
            .await;

        Ok(self.auth_response(&user, access_token, refresh_token))
    }

    /// Log in with email and password
    pub async fn login(&self, req: LoginRequest, meta: RequestMeta) -> Result<AuthResponse, AuthError> {
        let email = normalize_email(&req.email);
        let limit_key = format!("{}:{}", meta.ip_or_unknown(), email);

        let throttled = match self.login_limiter.check(&limit_key).await {
            Ok(()) => None,
            Err(e @ AuthError::TooManyRequests { .. }) => Some(e),
            Err(e) => return Err(e),
        };

        let user = self
            .users
            .find_by_email(&email, FindOptions::with_password())
            .await?;

        // A locked account reports the lock even once the limiter has also tripped
        if let Some(throttled) = throttled {
            if let Some(remaining_minutes) = user
                .as_ref()
                .and_then(|u| self.lockout.locked_for(u, Utc::now()))
            {
                return Err(AuthError::AccountLocked { remaining_minutes });
            }
            debug!(%email, "Login throttled");
            return Err(throttled);
        }

        // Always run one comparison so a missing account costs the same time
        let password_ok = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(digest) => match self.passwords.verify(&req.password, digest).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(%email, error = %e, "Stored password digest is unreadable");
                    false
                }
            },
            None => self.passwords.dummy_verify(&req.password).await,
        };

        let Some(user) = user else {
            self.login_limiter.hit(&limit_key).await?;
            debug!(%email, "Login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        if let Some(remaining_minutes) = self.lockout.locked_for(&user, now) {
            info!(user_id = %user.id, remaining_minutes, "Login refused, account locked");
            return Err(AuthError::AccountLocked { remaining_minutes });
        }

        if !password_ok {
            let (patch, outcome) = self.lockout.register_failure(&user, now);
            self.users.update_by_id(&user.id, patch).await?;
            self.login_limiter.hit(&limit_key).await?;
            if let FailureOutcome::Locked { until, .. } = outcome {
                let minutes = (until - now).num_minutes();
                self.notifier
                    .notify(&user.email, Notification::AccountLocked { minutes })
                    .await;
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !user.email_verified {
            return Err(AuthError::EmailNotVerified);
        }
        if user.status != UserStatus::Approved || !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        let patch = self.lockout.clear(&user).merge(UserPatch {
            last_login: Some(now),
            ..UserPatch::default()
        });
        let user = self
            .users
            .update_by_id(&user.id, patch)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        self.login_limiter.reset(&limit_key).await?;

        let (access_token, refresh_token, refresh_jti) = self.issue_pair(&user).await?;
        self.token_store
            .save_device_session(
                &user.id,
                &DeviceSession {
                    ip: meta.ip.clone(),
                    user_agent: meta.user_agent.clone(),
                    logged_in_at: now,
                    refresh_jti,
                },
                self.tokens.lifetime(TokenType::Refresh),
            )
            .await?;

        info!(user_id = %user.id, ip = %meta.ip_or_unknown(), "User logged in");
        Ok(self.auth_response(&user, access_token, refresh_token))
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// A well-signed token that is not the stored one is treated as stolen: the stored token is
    /// dropped so every holder has to log in again.
    pub async fn refresh_token(&self, req: RefreshRequest) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.verify_as(&req.refresh_token, TokenType::Refresh)?;

        let user = self
            .users
            .find_by_id(&claims.sub, FindOptions::including_deleted())
            .await?
            .filter(|user| !user.is_deleted())
            .ok_or(AuthError::AccountNotFound)?;

        if !self
            .token_store
            .matches(TokenType::Refresh, &user.id, &req.refresh_token)
            .await?
        {
            self.token_store.remove(TokenType::Refresh, &user.id).await?;
            warn!(user_id = %user.id, jti = %claims.jti, "Refresh token reuse detected, session revoked");
            return Err(AuthError::InvalidToken);
        }
        if !user.is_active {
            return Err(AuthError::AccountInactive);
        }

        let (access_token, refresh_token, _) = self.issue_pair(&user).await?;
        debug!(user_id = %user.id, "Refresh token rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: BEARER,
            expires_in: self.tokens.lifetime(TokenType::Access).as_secs(),
        })
    }

    /// End the caller's session.
    ///
    /// Never fails: unreadable tokens and cache errors are logged and skipped.
    pub async fn logout(
        &self,
        user_id: &str,
        refresh_token: Option<&str>,
        access_token: Option<&str>,
    ) -> MessageResponse {
        if refresh_token.is_some() {
            if let Err(e) = self.token_store.remove(TokenType::Refresh, user_id).await {
                warn!(%user_id, error = %e, "Could not drop refresh token");
            }
        }
        if let Err(e) = self.token_store.remove_device_session(user_id).await {
            warn!(%user_id, error = %e, "Could not drop device session");
        }

        if let Some(token) = access_token {
            match self.tokens.decode_allow_expired(token) {
                Ok(claims) => {
                    if let Err(e) = self
                        .token_store
                        .blacklist(token, &claims.jti, claims.remaining_secs())
                        .await
                    {
                        warn!(%user_id, error = %e, "Could not blacklist access token");
                    }
                }
                Err(e) => debug!(%user_id, error = %e, "Nothing to blacklist"),
            }
        }

        info!(%user_id, "User logged out");
        MessageResponse::new("Logged out successfully")
    }

    /// Start a password reset; the answer is the same whether or not the email is known
    pub async fn request_password_reset(&self, req: PasswordResetRequest) -> MessageResponse {
        let email = normalize_email(&req.email);
        match self.users.find_by_email(&email, FindOptions::default()).await {
            Ok(Some(user)) => {
                if let Err(e) = self.issue_reset_token(&user).await {
                    warn!(user_id = %user.id, error = %e, "Could not issue reset token");
                }
            }
            Ok(None) => {
                debug!(%email, "Reset requested for unknown email");
                tokio::time::sleep(Duration::from_millis(self.config.reset_request_delay_ms)).await;
            }
            Err(e) => warn!(%email, error = %e, "Reset lookup failed"),
        }
        MessageResponse::new(RESET_REQUESTED_MESSAGE)
    }

    async fn issue_reset_token(&self, user: &UserRecord) -> Result<(), AuthError> {
        let token = self.tokens.issue(&user.id, user.role, TokenType::Reset, None)?;
        self.token_store
            .save(
                TokenType::Reset,
                &user.id,
                &token,
                self.tokens.lifetime(TokenType::Reset),
            )
            .await?;
        info!(user_id = %user.id, "Password reset token issued");
        self.notifier
            .notify(&user.email, Notification::PasswordReset { token })
            .await;
        Ok(())
    }

    /// Set a new password with a reset token
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<MessageResponse, AuthError> {
        let claims = self.tokens.verify_as(&req.token, TokenType::Reset)?;
        if !self
            .token_store
            .matches(TokenType::Reset, &claims.sub, &req.token)
            .await?
        {
            return Err(AuthError::InvalidToken);
        }
        self.passwords.validate_strength(&req.password)?;

        let user = self
            .users
            .find_by_id(&claims.sub, FindOptions::default())
            .await?
            .ok_or(AuthError::AccountNotFound)?;

        let password_hash = self.passwords.hash(&req.password).await?;
        let patch = UserPatch {
            password_hash: Some(password_hash),
            password_changed_at: Some(Utc::now()),
            login_attempts: Some(0),
            locked_until: Some(None),
            ..UserPatch::default()
        };
        self.users.update_by_id(&user.id, patch).await?;

        self.token_store.remove(TokenType::Reset, &user.id).await?;
        self.token_store.end_all_sessions(&user.id).await?;

        info!(user_id = %user.id, "Password reset");
        self.notifier
            .notify(&user.email, Notification::PasswordChanged)
            .await;
        Ok(MessageResponse::new("Password has been reset successfully"))
    }

    /// Confirm an email address
    pub async fn verify_email(&self, req: VerifyEmailRequest) -> Result<MessageResponse, AuthError> {
        let claims = self.tokens.verify_as(&req.token, TokenType::Verification)?;

        let user = self
            .users
            .find_by_id(&claims.sub, FindOptions::default())
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if user.email_verified {
            return Err(AuthError::EmailAlreadyVerified);
        }
        if !self
            .token_store
            .matches(TokenType::Verification, &user.id, &req.token)
            .await?
        {
            return Err(AuthError::InvalidToken);
        }

        let now = Utc::now();
        self.users
            .update_by_id(
                &user.id,
                UserPatch {
                    email_verified: Some(true),
                    email_verified_at: Some(Some(now)),
                    ..UserPatch::default()
                },
            )
            .await?;
        self.token_store
            .remove(TokenType::Verification, &user.id)
            .await?;

        info!(user_id = %user.id, "Email verified");
        Ok(MessageResponse::new("Email verified successfully"))
    }

    /// Send a fresh verification token; generic answer in every case
    pub async fn resend_verification(&self, req: ResendVerificationRequest) -> MessageResponse {
        let email = normalize_email(&req.email);
        match self.users.find_by_email(&email, FindOptions::default()).await {
            Ok(Some(user)) if !user.email_verified => {
                if let Err(e) = self.issue_verification_token(&user).await {
                    warn!(user_id = %user.id, error = %e, "Could not issue verification token");
                }
            }
            Ok(_) => debug!(%email, "Verification resend skipped"),
            Err(e) => warn!(%email, error = %e, "Verification lookup failed"),
        }
        MessageResponse::new(VERIFICATION_RESENT_MESSAGE)
    }

    async fn issue_verification_token(&self, user: &UserRecord) -> Result<(), AuthError> {
        let token = self
            .tokens
            .issue(&user.id, user.role, TokenType::Verification, None)?;
        self.token_store
            .save(
                TokenType::Verification,
                &user.id,
                &token,
                self.tokens.lifetime(TokenType::Verification),
            )
            .await?;
        self.notifier
            .notify(&user.email, Notification::Verification { token })
            .await;
        Ok(())
    }

    /// Change password while logged in; other sessions have to log in again
    pub async fn change_password(
        &self,
        user_id: &str,
        req: ChangePasswordRequest,
    ) -> Result<MessageResponse, AuthError> {
        let user = self
            .users
            .find_by_id(user_id, FindOptions::with_password())
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        let digest = user
            .password_hash
            .as_deref()
            .ok_or_else(|| AuthError::Internal("password hash not loaded".to_string()))?;

        if !self.passwords.verify(&req.current_password, digest).await? {
            return Err(AuthError::validation("Current password is incorrect"));
        }
        if req.current_password == req.new_password {
            return Err(AuthError::validation(
                "New password must be different from the current password",
            ));
        }
        self.passwords.validate_strength(&req.new_password)?;

        let password_hash = self.passwords.hash(&req.new_password).await?;
        self.users
            .update_by_id(
                &user.id,
                UserPatch {
                    password_hash: Some(password_hash),
                    password_changed_at: Some(Utc::now()),
                    ..UserPatch::default()
                },
            )
            .await?;
        self.token_store.end_all_sessions(&user.id).await?;

        info!(user_id = %user.id, "Password changed");
        self.notifier
            .notify(&user.email, Notification::PasswordChanged)
            .await;
        Ok(MessageResponse::new("Password changed successfully"))
    }

    /// Sanitized view of the caller
    pub async fn current_user(&self, user_id: &str) -> Result<PublicUser, AuthError> {
        self.users
            .find_by_id(user_id, FindOptions::default())
            .await?
            .map(|user| user.to_public())
            .ok_or(AuthError::AccountNotFound)
    }

    /// Issues access + refresh tokens and stores the refresh token as the only live one.
    ///
    /// Returns `(access, refresh, refresh_jti)`.
    async fn issue_pair(&self, user: &UserRecord) -> Result<(String, String, String), AuthError> {
        let extra = ExtraClaims {
            status: Some(user.status.to_string()),
            permissions: None,
        };
        let access_token = self
            .tokens
            .issue(&user.id, user.role, TokenType::Access, Some(extra))?;
        let (refresh_token, refresh_claims) =
            self.tokens
                .issue_with_claims(&user.id, user.role, TokenType::Refresh, None)?;
        self.token_store
            .save(
                TokenType::Refresh,
                &user.id,
                &refresh_token,
                self.tokens.lifetime(TokenType::Refresh),
            )
            .await?;
        Ok((access_token, refresh_token, refresh_claims.jti))
    }

    fn auth_response(&self, user: &UserRecord, access_token: String, refresh_token: String) -> AuthResponse {
        AuthResponse {
            user: user.to_public(),
            access_token,
            refresh_token,
            token_type: BEARER,
            expires_in: self.tokens.lifetime(TokenType::Access).as_secs(),
        }
    }
}

/// Trimmed, lower-cased email
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_PATTERN.is_match(email)
}
