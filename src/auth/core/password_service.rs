//! Password hashing and policy

use tracing::warn;

use crate::auth::{config::PasswordConfig, errors::AuthError};

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?/~`'\"\\";

/// bcrypt-backed credential hasher.
///
/// Hashing runs on the blocking pool so a slow work factor never stalls the request
/// executor.
pub struct PasswordService {
    config: PasswordConfig,
    /// Digest compared against when the account does not exist
    dummy_hash: Option<String>,
}

impl PasswordService {
    /// Builds the dummy digest up front so the first unknown-email login costs one
    /// comparison like every later one.
    pub fn new(config: PasswordConfig) -> Self {
        // Unguessable plaintext at the configured cost
        let dummy_hash = match bcrypt::hash(uuid::Uuid::new_v4().to_string(), config.bcrypt_cost) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(error = %e, "Dummy hash unavailable");
                None
            }
        };
        Self { config, dummy_hash }
    }

    /// Collects every policy violation instead of stopping at the first one
    pub fn validate_strength(&self, password: &str) -> Result<(), AuthError> {
        let mut problems = Vec::new();

        if password.chars().count() < self.config.min_length {
            problems.push(format!(
                "Password must be at least {} characters long",
                self.config.min_length
            ));
        }
        if self.config.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            problems.push("Password must contain at least one digit".to_string());
        }
        if self.config.require_letter && !password.chars().any(|c| c.is_alphabetic()) {
            problems.push("Password must contain at least one letter".to_string());
        }
        if self.config.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            problems.push("Password must contain at least one special character".to_string());
        }
        // bcrypt only looks at the first 72 bytes
        if password.len() > 72 {
            problems.push("Password must be at most 72 bytes long".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuthError::ValidationFailed(problems))
        }
    }

    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_string();
        let cost = self.config.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// `Ok(false)` on mismatch; `Err` only when `digest` is not a bcrypt hash
    pub async fn verify(&self, password: &str, digest: &str) -> Result<bool, AuthError> {
        let password = password.to_string();
        let digest = digest.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &digest))
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?
            .map_err(|e| AuthError::Verification(e.to_string()))
    }

    /// Runs a full comparison against a digest no password matches.
    ///
    /// Called when the account does not exist so the response takes as long as a real
    /// wrong-password check. Always returns `false`.
    pub async fn dummy_verify(&self, password: &str) -> bool {
        if let Some(digest) = &self.dummy_hash {
            let _ = self.verify(password, digest).await;
        }
        false
    }

    pub fn cost(&self) -> u32 {
        self.config.bcrypt_cost
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new(PasswordConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn fast_service() -> PasswordService {
        PasswordService::new(PasswordConfig {
            bcrypt_cost: 4,
            ..PasswordConfig::default()
        })
    }

    #[test_case("Sh0rt!" ; "too short")]
    #[test_case("NoDigitsHere!" ; "missing digit")]
    #[test_case("12345678!" ; "missing letter")]
    #[test_case("NoSpecial123" ; "missing special")]
    fn test_weak_passwords_rejected(password: &str) {
        assert!(matches!(
            fast_service().validate_strength(password),
            Err(AuthError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_all_violations_reported() {
        match fast_service().validate_strength("abc") {
            Err(AuthError::ValidationFailed(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_strong_password_accepted() {
        assert!(fast_service().validate_strength("Str0ng!Pass").is_ok());
    }

    #[tokio::test]
    async fn test_hash_and_verify() {
        let service = fast_service();
        let hash = service.hash("Str0ng!Pass").await.unwrap();

        assert!(hash.starts_with("$2"));
        assert!(service.verify("Str0ng!Pass", &hash).await.unwrap());
        assert!(!service.verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_digest_is_an_error() {
        let result = fast_service().verify("anything", "not-a-bcrypt-hash").await;
        assert!(matches!(result, Err(AuthError::Verification(_))));
    }

    #[test]
    fn test_dummy_digest_ready_at_construction() {
        let service = fast_service();
        let digest = service.dummy_hash.as_deref().expect("dummy digest built in new");
        assert!(digest.starts_with("$2"));
        assert!(digest.contains("$04$"));
    }

    #[tokio::test]
    async fn test_dummy_verify_never_matches() {
        let service = fast_service();
        assert!(!service.dummy_verify("Str0ng!Pass").await);
        assert!(!service.dummy_verify("").await);
    }
}
