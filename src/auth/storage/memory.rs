//! In-memory storage (development and tests)

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::r#trait::{FindOptions, NewUser, SessionFactory, UnitOfWork, UserPatch, UserRepository};
use crate::auth::{
    errors::AuthError,
    types::{Role, UserRecord},
};

#[derive(Default)]
struct Tables {
    /// id -> user
    users: HashMap<String, UserRecord>,
    /// email -> id
    email_index: HashMap<String, String>,
    /// user id -> (role, profile)
    profiles: HashMap<String, (Role, Value)>,
}

/// In-memory user and profile store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a committed user and profile in one step; used to provision admin accounts
    pub async fn seed(&self, user: NewUser, profile: Value) -> Result<UserRecord, AuthError> {
        let role = user.role;
        let mut session = self.start_session().await?;
        let created = session.create_user(user).await?;
        session.insert_profile(role, &created.id, profile).await?;
        session.commit().await?;
        Ok(created)
    }

    /// Marks the record deleted; it disappears from default lookups
    pub async fn soft_delete(&self, id: &str) -> Result<bool, AuthError> {
        let patch = UserPatch {
            deleted_at: Some(Some(Utc::now())),
            ..UserPatch::default()
        };
        let deleted = self.update_by_id(id, patch).await?.is_some();
        if deleted {
            info!(user_id = %id, "User soft-deleted");
        }
        Ok(deleted)
    }

    pub async fn profile(&self, user_id: &str) -> Option<(Role, Value)> {
        self.tables.read().await.profiles.get(user_id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

fn project(user: &UserRecord, options: FindOptions) -> Option<UserRecord> {
    if user.is_deleted() && !options.include_deleted {
        return None;
    }
    let mut user = user.clone();
    if !options.with_password {
        user.password_hash = None;
    }
    Some(user)
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_email(
        &self,
        email: &str,
        options: FindOptions,
    ) -> Result<Option<UserRecord>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables
            .email_index
            .get(&email.trim().to_lowercase())
            .and_then(|id| tables.users.get(id))
            .and_then(|user| project(user, options)))
    }

    async fn find_by_id(
        &self,
        id: &str,
        options: FindOptions,
    ) -> Result<Option<UserRecord>, AuthError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(id).and_then(|user| project(user, options)))
    }

    async fn update_by_id(
        &self,
        id: &str,
        patch: UserPatch,
    ) -> Result<Option<UserRecord>, AuthError> {
        let mut tables = self.tables.write().await;
        let Some(user) = tables.users.get_mut(id).filter(|user| !user.is_deleted()) else {
            return Ok(None);
        };
        patch.apply(user);
        debug!(user_id = %id, "User updated");
        Ok(project(user, FindOptions::default()))
    }

    async fn admin_permissions(&self, user_id: &str) -> Result<Vec<String>, AuthError> {
        let tables = self.tables.read().await;
        let permissions = match tables.profiles.get(user_id) {
            Some((Role::Admin, profile)) => profile
                .get("permissions")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(permissions)
    }
}

#[async_trait]
impl SessionFactory for MemoryStore {
    async fn start_session(&self) -> Result<Box<dyn UnitOfWork>, AuthError> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            users: Vec::new(),
            profiles: Vec::new(),
            finished: false,
        }))
    }
}

/// Buffers writes until commit
struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    users: Vec<UserRecord>,
    profiles: Vec<(String, Role, Value)>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), AuthError> {
        if self.finished {
            Err(AuthError::Storage("transaction already finished".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryTransaction {
    async fn create_user(&mut self, user: NewUser) -> Result<UserRecord, AuthError> {
        self.ensure_open()?;
        let email = user.email.trim().to_lowercase();
        let taken = self.tables.read().await.email_index.contains_key(&email)
            || self.users.iter().any(|staged| staged.email == email);
        if taken {
            return Err(AuthError::AccountAlreadyExists);
        }

        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash: Some(user.password_hash),
            role: user.role,
            is_active: true,
            status: user.status,
            email_verified: false,
            email_verified_at: None,
            login_attempts: 0,
            locked_until: None,
            last_login: None,
            password_changed_at: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.users.push(record.clone());
        Ok(record)
    }

    async fn insert_profile(
        &mut self,
        role: Role,
        user_id: &str,
        profile: Value,
    ) -> Result<(), AuthError> {
        self.ensure_open()?;
        self.profiles.push((user_id.to_string(), role, profile));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AuthError> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        // Another session may have taken the email since create_user
        if self
            .users
            .iter()
            .any(|user| tables.email_index.contains_key(&user.email))
        {
            self.finished = true;
            return Err(AuthError::AccountAlreadyExists);
        }

        for user in self.users.drain(..) {
            tables.email_index.insert(user.email.clone(), user.id.clone());
            tables.users.insert(user.id.clone(), user);
        }
        for (user_id, role, profile) in self.profiles.drain(..) {
            tables.profiles.insert(user_id, (role, profile));
        }
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        if !self.finished {
            debug!(
                users = self.users.len(),
                profiles = self.profiles.len(),
                "Transaction aborted"
            );
        }
        self.users.clear();
        self.profiles.clear();
        self.finished = true;
    }
}
