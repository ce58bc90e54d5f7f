//! Shared test fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use incubator_auth::auth::config::{AuthConfig, PasswordConfig};
use incubator_auth::auth::notifier::{Notification, Notifier};
use incubator_auth::auth::storage::{MemoryStore, NewUser, UserPatch, UserRepository};
use incubator_auth::auth::types::{RegisterRequest, Role, UserStatus, VerifyEmailRequest};
use incubator_auth::auth::AuthService;
use incubator_auth::cache::{Cache, CacheStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

pub const PASSWORD: &str = "Str0ng!Pass";
pub const SECRET: &str = "Kq8vN2-incubator-signing-Zx7Lp4-Rw9Tm3";

/// Keeps every notification so tests can read the tokens they carry
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
}

impl RecordingNotifier {
    pub fn last_verification_token(&self, email: &str) -> Option<String> {
        self.sent.lock().iter().rev().find_map(|(to, n)| match n {
            Notification::Verification { token } if to == email => Some(token.clone()),
            _ => None,
        })
    }

    pub fn last_reset_token(&self, email: &str) -> Option<String> {
        self.sent.lock().iter().rev().find_map(|(to, n)| match n {
            Notification::PasswordReset { token } if to == email => Some(token.clone()),
            _ => None,
        })
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, n)| n.kind() == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, email: &str, notification: Notification) {
        self.sent.lock().push((email.to_string(), notification));
    }
}

pub struct Harness {
    pub service: Arc<AuthService>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<Cache>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.jwt.secret = SECRET.to_string();
    config.password = PasswordConfig {
        bcrypt_cost: 4,
        ..PasswordConfig::default()
    };
    config.reset_request_delay_ms = 10;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(Cache::in_memory());
    let notifier = Arc::new(RecordingNotifier::default());
    let cache_store: Arc<dyn CacheStore> = cache.clone();
    let service = AuthService::new(config, Arc::clone(&store), cache_store)
        .expect("valid test configuration")
        .with_notifier(notifier.clone());
    Harness {
        service: Arc::new(service),
        store,
        cache,
        notifier,
    }
}

pub fn student_profile() -> Value {
    json!({ "first_name": "Ada", "last_name": "Lovelace" })
}

pub fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        role: Role::Student,
        profile: student_profile(),
    }
}

impl Harness {
    /// Registers and verifies a student; returns the user id
    pub async fn verified_student(&self, email: &str) -> String {
        let registered = self
            .service
            .register(register_request(email))
            .await
            .expect("registration");
        let token = self
            .notifier
            .last_verification_token(email)
            .expect("verification token sent");
        self.service
            .verify_email(VerifyEmailRequest { token })
            .await
            .expect("verification");
        registered.user.id
    }

    /// Creates an approved, verified admin with the given permissions
    pub async fn admin(&self, email: &str, permissions: &[&str]) -> String {
        let hash = bcrypt::hash(PASSWORD, 4).expect("hash");
        let admin = self
            .store
            .seed(
                NewUser {
                    email: email.to_string(),
                    password_hash: hash,
                    role: Role::Admin,
                    status: UserStatus::Approved,
                },
                json!({ "permissions": permissions }),
            )
            .await
            .expect("seed admin");
        self.store
            .update_by_id(
                &admin.id,
                UserPatch {
                    email_verified: Some(true),
                    ..UserPatch::default()
                },
            )
            .await
            .expect("verify admin");
        admin.id
    }
}
