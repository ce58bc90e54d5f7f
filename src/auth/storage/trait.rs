//! Storage contracts consumed by the auth core

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::auth::{
    errors::AuthError,
    types::{Role, UserRecord, UserStatus},
};

/// Lookup options
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Populate [`UserRecord::password_hash`]
    pub with_password: bool,
    /// Return soft-deleted records too
    pub include_deleted: bool,
}

impl FindOptions {
    pub fn with_password() -> Self {
        Self {
            with_password: true,
            ..Self::default()
        }
    }

    pub fn including_deleted() -> Self {
        Self {
            include_deleted: true,
            ..Self::default()
        }
    }
}

/// Fields to create a user with
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
}

/// Partial update; `None` leaves a field untouched.
///
/// Nullable columns use `Option<Option<_>>` so they can be cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub password_hash: Option<String>,
    pub status: Option<UserStatus>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
    pub email_verified_at: Option<Option<DateTime<Utc>>>,
    pub login_attempts: Option<u32>,
    pub locked_until: Option<Option<DateTime<Utc>>>,
    pub last_login: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two patches, `other` wins on overlap
    pub fn merge(mut self, other: UserPatch) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            password_hash,
            status,
            is_active,
            email_verified,
            email_verified_at,
            login_attempts,
            locked_until,
            last_login,
            password_changed_at,
            deleted_at
        );
        self
    }

    pub fn apply(&self, user: &mut UserRecord) {
        if let Some(hash) = &self.password_hash {
            user.password_hash = Some(hash.clone());
        }
        if let Some(status) = self.status {
            user.status = status;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(verified) = self.email_verified {
            user.email_verified = verified;
        }
        if let Some(at) = self.email_verified_at {
            user.email_verified_at = at;
        }
        if let Some(attempts) = self.login_attempts {
            user.login_attempts = attempts;
        }
        if let Some(until) = self.locked_until {
            user.locked_until = until;
        }
        if let Some(at) = self.last_login {
            user.last_login = Some(at);
        }
        if let Some(at) = self.password_changed_at {
            user.password_changed_at = Some(at);
        }
        if let Some(at) = self.deleted_at {
            user.deleted_at = at;
        }
    }
}

/// User repository.
///
/// Implementations filter soft-deleted records themselves unless the caller passes
/// [`FindOptions::include_deleted`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(
        &self,
        email: &str,
        options: FindOptions,
    ) -> Result<Option<UserRecord>, AuthError>;

    async fn find_by_id(
        &self,
        id: &str,
        options: FindOptions,
    ) -> Result<Option<UserRecord>, AuthError>;

    /// Returns the updated record, `None` when no live record has this id
    async fn update_by_id(&self, id: &str, patch: UserPatch)
        -> Result<Option<UserRecord>, AuthError>;

    /// Fine-grained permissions of an admin account; empty for other roles
    async fn admin_permissions(&self, user_id: &str) -> Result<Vec<String>, AuthError>;
}

/// Transaction opened by [`SessionFactory::start_session`].
///
/// Nothing written through it is visible to [`UserRepository`] until
/// [`commit`](UnitOfWork::commit). Dropping it without committing discards the writes.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn create_user(&mut self, user: NewUser) -> Result<UserRecord, AuthError>;

    async fn insert_profile(
        &mut self,
        role: Role,
        user_id: &str,
        profile: Value,
    ) -> Result<(), AuthError>;

    async fn commit(&mut self) -> Result<(), AuthError>;

    async fn abort(&mut self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn start_session(&self) -> Result<Box<dyn UnitOfWork>, AuthError>;
}

/// Role-specific profile persistence
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    fn role(&self) -> Role;

    /// Checks and normalises the registration payload
    fn prepare(&self, profile: Value) -> Result<Value, AuthError>;

    async fn create_profile(
        &self,
        session: &mut dyn UnitOfWork,
        user_id: &str,
        profile: Value,
    ) -> Result<(), AuthError> {
        let profile = self.prepare(profile)?;
        session.insert_profile(self.role(), user_id, profile).await
    }
}
