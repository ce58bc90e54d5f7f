//! Account lockout
//!
//! Failed-login bookkeeping stored on the user record. The policy is pure: it reads a
//! [`UserRecord`] and returns the [`UserPatch`] the caller persists.

use chrono::{DateTime, Duration, Utc};

use crate::auth::{config::LockoutConfig, storage::UserPatch, types::UserRecord};

/// Result of recording a failed login
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Still below the threshold
    Counted { attempts: u32, remaining: u32 },
    /// Threshold reached; the account is locked until the given time
    Locked { attempts: u32, until: DateTime<Utc> },
}

/// Account lockout policy
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    max_attempts: u32,
    duration: Duration,
}

impl LockoutPolicy {
    pub fn new(config: &LockoutConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            duration: config.duration(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Remaining lock time in whole minutes (rounded up), `None` when not locked
    pub fn locked_for(&self, user: &UserRecord, now: DateTime<Utc>) -> Option<i64> {
        let until = user.locked_until.filter(|until| *until > now)?;
        let secs = (until - now).num_seconds().max(1);
        Some((secs + 59) / 60)
    }

    /// Counts a failed login.
    ///
    /// A lock that has run out restarts the count at 1.
    pub fn register_failure(&self, user: &UserRecord, now: DateTime<Utc>) -> (UserPatch, FailureOutcome) {
        let lock_expired = user.locked_until.is_some_and(|until| until <= now);
        let previous = if lock_expired { 0 } else { user.login_attempts };
        let attempts = previous.saturating_add(1);

        if attempts >= self.max_attempts {
            let until = now + self.duration;
            tracing::warn!(
                user_id = %user.id,
                attempts,
                lockout_secs = self.duration.num_seconds(),
                "Account locked due to too many failed attempts"
            );
            let patch = UserPatch {
                login_attempts: Some(attempts),
                locked_until: Some(Some(until)),
                ..UserPatch::default()
            };
            return (patch, FailureOutcome::Locked { attempts, until });
        }

        let patch = UserPatch {
            login_attempts: Some(attempts),
            locked_until: lock_expired.then_some(None),
            ..UserPatch::default()
        };
        (
            patch,
            FailureOutcome::Counted {
                attempts,
                remaining: self.max_attempts - attempts,
            },
        )
    }

    /// Reset after a successful login or password reset; empty when nothing to clear
    pub fn clear(&self, user: &UserRecord) -> UserPatch {
        if user.login_attempts == 0 && user.locked_until.is_none() {
            return UserPatch::default();
        }
        tracing::debug!(user_id = %user.id, "Reset failure count");
        UserPatch {
            login_attempts: Some(0),
            locked_until: Some(None),
            ..UserPatch::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::{Role, UserStatus};

    fn policy() -> LockoutPolicy {
        LockoutPolicy::new(&LockoutConfig {
            max_attempts: 3,
            lockout_duration_secs: 600,
        })
    }

    fn user() -> UserRecord {
        UserRecord {
            id: "user-1".to_string(),
            email: "test@example.com".to_string(),
            password_hash: None,
            role: Role::Student,
            is_active: true,
            status: UserStatus::Approved,
            email_verified: true,
            email_verified_at: None,
            login_attempts: 0,
            locked_until: None,
            last_login: None,
            password_changed_at: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_lockout_after_max_attempts() {
        let policy = policy();
        let mut user = user();
        let now = Utc::now();

        for expected_remaining in [2, 1] {
            let (patch, outcome) = policy.register_failure(&user, now);
            assert!(matches!(
                outcome,
                FailureOutcome::Counted { remaining, .. } if remaining == expected_remaining
            ));
            patch.apply(&mut user);
        }

        let (patch, outcome) = policy.register_failure(&user, now);
        assert_eq!(
            outcome,
            FailureOutcome::Locked {
                attempts: 3,
                until: now + Duration::seconds(600)
            }
        );
        patch.apply(&mut user);

        assert_eq!(policy.locked_for(&user, now), Some(10));
        assert_eq!(policy.locked_for(&user, now + Duration::seconds(541)), Some(1));
        assert_eq!(policy.locked_for(&user, now + Duration::seconds(600)), None);
    }

    #[test]
    fn test_expired_lock_restarts_count() {
        let policy = policy();
        let now = Utc::now();
        let mut user = user();
        user.login_attempts = 3;
        user.locked_until = Some(now - Duration::seconds(1));

        let (patch, outcome) = policy.register_failure(&user, now);
        assert_eq!(outcome, FailureOutcome::Counted { attempts: 1, remaining: 2 });
        assert_eq!(patch.locked_until, Some(None));
    }

    #[test]
    fn test_clear_resets_counter() {
        let policy = policy();
        assert!(policy.clear(&user()).is_empty());

        let mut locked = user();
        locked.login_attempts = 2;
        let patch = policy.clear(&locked);
        patch.apply(&mut locked);
        assert_eq!(locked.login_attempts, 0);
        assert!(locked.locked_until.is_none());
    }
}
