//! Auth configuration

use jsonwebtoken::Algorithm;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::{errors::AuthError, types::UserStatus};
use crate::cache::CacheConfig;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Auth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub environment: Environment,

    pub jwt: JwtConfig,

    pub password: PasswordConfig,

    pub lockout: LockoutConfig,

    /// Login attempts per IP+email
    pub login_rate_limit: RateLimitConfig,

    /// Requests per email or IP on the login, reset and resend endpoints
    pub endpoint_rate_limit: RateLimitConfig,

    pub cache: CacheConfig,

    /// Status given to new accounts
    pub initial_status: UserStatus,

    /// Delay before answering a reset request for an unknown email (milliseconds)
    pub reset_request_delay_ms: u64,

    /// Trust `X-Forwarded-For` / `X-Real-IP`
    pub trust_proxy_headers: bool,
}

/// JWT configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(skip_serializing)]
    pub secret: String,

    /// `HS256`, `HS384` or `HS512`
    pub algorithm: String,

    pub issuer: String,

    pub audience: String,

    /// Lifetimes in seconds
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub reset_ttl_secs: u64,
    pub verification_ttl_secs: u64,

    /// Skip expiry checks; refused in production
    pub ignore_expiration: bool,
}

/// Password configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    pub min_length: usize,

    pub require_digit: bool,

    pub require_letter: bool,

    pub require_special: bool,

    /// bcrypt cost
    pub bcrypt_cost: u32,
}

/// Account lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failed logins before the account locks
    pub max_attempts: u32,

    pub lockout_duration_secs: u64,
}

/// Fixed-window attempt limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_attempts: u32,

    pub window_secs: u64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("reset_ttl_secs", &self.reset_ttl_secs)
            .field("verification_ttl_secs", &self.verification_ttl_secs)
            .field("ignore_expiration", &self.ignore_expiration)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            jwt: JwtConfig::default(),
            password: PasswordConfig::default(),
            lockout: LockoutConfig::default(),
            login_rate_limit: RateLimitConfig::default(),
            endpoint_rate_limit: RateLimitConfig::endpoint_default(),
            cache: CacheConfig::default(),
            initial_status: UserStatus::Approved,
            reset_request_delay_ms: 500,
            trust_proxy_headers: false,
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: random_secret(),
            algorithm: "HS256".to_string(),
            issuer: "incubator-backend".to_string(),
            audience: "incubator-app".to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 3600,
            reset_ttl_secs: 3600,
            verification_ttl_secs: 24 * 3600,
            ignore_expiration: false,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_digit: true,
            require_letter: true,
            require_special: true,
            bcrypt_cost: 12,
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration_secs: 2 * 3600,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 15 * 60,
        }
    }
}

impl RateLimitConfig {
    fn endpoint_default() -> Self {
        Self {
            max_attempts: 10,
            window_secs: 15 * 60,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl LockoutConfig {
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockout_duration_secs as i64)
    }
}

impl JwtConfig {
    pub fn algorithm(&self) -> Result<Algorithm, AuthError> {
        let algorithm = Algorithm::from_str(&self.algorithm)
            .map_err(|_| AuthError::Config(format!("unknown JWT algorithm '{}'", self.algorithm)))?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => Err(AuthError::Config(format!(
                "JWT algorithm {other:?} needs a key pair; only HMAC algorithms are supported"
            ))),
        }
    }
}

impl AuthConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, AuthError> {
        let environment = env_parse("APP_ENV", Environment::Development);
        let config = Self {
            environment,
            jwt: JwtConfig::from_env(environment)?,
            password: PasswordConfig::from_env(),
            lockout: LockoutConfig::from_env(),
            login_rate_limit: RateLimitConfig::from_env(
                "LOGIN_RATE_LIMIT",
                RateLimitConfig::default(),
            ),
            endpoint_rate_limit: RateLimitConfig::from_env(
                "AUTH_RATE_LIMIT",
                RateLimitConfig::endpoint_default(),
            ),
            cache: CacheConfig::from_env(),
            initial_status: env_parse("AUTH_INITIAL_STATUS", UserStatus::Approved),
            reset_request_delay_ms: env_parse("PASSWORD_RESET_DELAY_MS", 500),
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the services cannot run with
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut problems = Vec::new();

        if let Err(AuthError::Config(msg)) = self.jwt.algorithm() {
            problems.push(msg);
        }
        if let Err(msg) = check_secret_strength(&self.jwt.secret) {
            problems.push(msg);
        }
        if self.jwt.issuer.trim().is_empty() || self.jwt.audience.trim().is_empty() {
            problems.push("JWT issuer and audience must be set".to_string());
        }
        if !(4..=31).contains(&self.password.bcrypt_cost) {
            problems.push(format!(
                "bcrypt cost must be within 4..=31, got {}",
                self.password.bcrypt_cost
            ));
        }
        if self.lockout.max_attempts == 0
            || self.login_rate_limit.max_attempts == 0
            || self.endpoint_rate_limit.max_attempts == 0
        {
            problems.push("attempt thresholds must be greater than zero".to_string());
        }
        if self.login_rate_limit.window_secs == 0 || self.endpoint_rate_limit.window_secs == 0 {
            problems.push("rate limit window must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Config(problems.join("; ")))
        }
    }

    /// Whether expiry checks are skipped; never in production
    pub fn ignore_expiration(&self) -> bool {
        self.jwt.ignore_expiration && !self.environment.is_production()
    }

    pub fn expose_error_details(&self) -> bool {
        !self.environment.is_production()
    }
}

impl JwtConfig {
    fn from_env(environment: Environment) -> Result<Self, AuthError> {
        let defaults = Self::default();
        let secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ if environment.is_production() => {
                return Err(AuthError::Config(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            _ => {
                tracing::warn!("JWT_SECRET not set, using a random per-process secret");
                defaults.secret.clone()
            }
        };

        let ignore_expiration = env_parse("JWT_IGNORE_EXPIRATION", false);
        if ignore_expiration && environment.is_production() {
            tracing::warn!("JWT_IGNORE_EXPIRATION is ignored in production");
        }

        Ok(Self {
            secret,
            algorithm: std::env::var("JWT_ALGORITHM").unwrap_or(defaults.algorithm),
            issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.audience),
            access_ttl_secs: env_parse("JWT_ACCESS_TTL_SECS", defaults.access_ttl_secs),
            refresh_ttl_secs: env_parse("JWT_REFRESH_TTL_SECS", defaults.refresh_ttl_secs),
            reset_ttl_secs: env_parse("JWT_RESET_TTL_SECS", defaults.reset_ttl_secs),
            verification_ttl_secs: env_parse(
                "JWT_VERIFICATION_TTL_SECS",
                defaults.verification_ttl_secs,
            ),
            ignore_expiration,
        })
    }
}

impl PasswordConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_length: env_parse("PASSWORD_MIN_LENGTH", defaults.min_length),
            bcrypt_cost: env_parse("BCRYPT_COST", defaults.bcrypt_cost),
            ..defaults
        }
    }
}

impl LockoutConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_parse("MAX_LOGIN_ATTEMPTS", defaults.max_attempts),
            lockout_duration_secs: env_parse(
                "LOCKOUT_DURATION_SECS",
                defaults.lockout_duration_secs,
            ),
        }
    }
}

impl RateLimitConfig {
    fn from_env(prefix: &str, defaults: Self) -> Self {
        Self {
            max_attempts: env_parse(&format!("{prefix}_MAX"), defaults.max_attempts),
            window_secs: env_parse(&format!("{prefix}_WINDOW_SECS"), defaults.window_secs),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Secrets that show up in tutorials and leaked configs
const WEAK_SECRETS: &[&str] = &[
    "dev_secret_key",
    "changeme",
    "secret",
    "password",
    "12345678",
    "default",
];

/// Minimum signing secret length
pub const MIN_SECRET_LENGTH: usize = 32;

pub(crate) fn check_secret_strength(secret: &str) -> Result<(), String> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(format!(
            "JWT secret must be at least {MIN_SECRET_LENGTH} characters"
        ));
    }
    let lowered = secret.to_lowercase();
    if let Some(weak) = WEAK_SECRETS.iter().find(|weak| lowered.contains(**weak)) {
        return Err(format!("weak JWT secret detected: contains '{weak}'"));
    }
    Ok(())
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jwt.access_ttl_secs, 900);
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.login_rate_limit.window_secs, 900);
    }

    #[test]
    fn test_weak_secret_rejected() {
        let mut config = AuthConfig::default();
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        config.jwt.secret = "my-very-long-password-based-signing-key-000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_asymmetric_algorithm_rejected() {
        let mut config = AuthConfig::default();
        config.jwt.algorithm = "RS256".to_string();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_ignore_expiration_never_in_production() {
        let mut config = AuthConfig::default();
        config.jwt.ignore_expiration = true;
        assert!(config.ignore_expiration());

        config.environment = Environment::Production;
        assert!(!config.ignore_expiration());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = JwtConfig::default();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(&config.secret));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        std::env::set_var("APP_ENV", "test");
        std::env::set_var("JWT_SECRET", "Kq8vN2-incubator-signing-Zx7Lp4-Rw9Tm3");
        std::env::set_var("MAX_LOGIN_ATTEMPTS", "3");
        std::env::set_var("LOGIN_RATE_LIMIT_MAX", "10");
        std::env::set_var("AUTH_INITIAL_STATUS", "pending");

        let config = AuthConfig::from_env().unwrap();

        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.lockout.max_attempts, 3);
        assert_eq!(config.login_rate_limit.max_attempts, 10);
        assert_eq!(config.initial_status, UserStatus::Pending);

        for key in [
            "APP_ENV",
            "JWT_SECRET",
            "MAX_LOGIN_ATTEMPTS",
            "LOGIN_RATE_LIMIT_MAX",
            "AUTH_INITIAL_STATUS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_production_requires_secret() {
        std::env::set_var("APP_ENV", "production");
        std::env::remove_var("JWT_SECRET");

        assert!(matches!(AuthConfig::from_env(), Err(AuthError::Config(_))));

        std::env::remove_var("APP_ENV");
    }
}
