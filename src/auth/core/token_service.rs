//! JWT issuance and verification

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::auth::{
    config::{check_secret_strength, JwtConfig},
    errors::AuthError,
    types::Role,
};

/// Symmetric tolerance for clock differences between issuer and verifier (seconds)
pub const CLOCK_SKEW_SECS: u64 = 5;

/// What a token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    Reset,
    Verification,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Reset => "reset",
            Self::Verification => "verification",
        };
        f.write_str(name)
    }
}

/// Optional claims carried next to the standard set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

/// JWT Claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// Unique token id
    pub jti: String,
    #[serde(flatten)]
    pub extra: ExtraClaims,
}

impl Claims {
    /// Seconds until expiry; negative once expired
    pub fn remaining_secs(&self) -> i64 {
        self.exp - Utc::now().timestamp()
    }
}

/// Token management service
pub struct TokenService {
    /// Signing secret, wiped on drop
    secret: Zeroizing<String>,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    lifetimes: [(TokenType, u64); 4],
    ignore_expiration: bool,
}

impl TokenService {
    /// Build from configuration.
    ///
    /// # Security
    /// - rejects secrets shorter than 32 characters or containing common words
    /// - only HMAC algorithms are accepted
    pub fn new(config: &JwtConfig, ignore_expiration: bool) -> Result<Self, AuthError> {
        check_secret_strength(&config.secret).map_err(AuthError::Config)?;
        let algorithm = config.algorithm()?;

        if ignore_expiration {
            tracing::warn!("Token expiry checks are disabled");
        }

        Ok(Self {
            secret: Zeroizing::new(config.secret.clone()),
            algorithm,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            lifetimes: [
                (TokenType::Access, config.access_ttl_secs),
                (TokenType::Refresh, config.refresh_ttl_secs),
                (TokenType::Reset, config.reset_ttl_secs),
                (TokenType::Verification, config.verification_ttl_secs),
            ],
            ignore_expiration,
        })
    }

    /// Default lifetime of a token type
    pub fn lifetime(&self, token_type: TokenType) -> Duration {
        let secs = self
            .lifetimes
            .iter()
            .find(|(t, _)| *t == token_type)
            .map(|(_, secs)| *secs)
            .unwrap_or(0);
        Duration::from_secs(secs)
    }

    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        token_type: TokenType,
        extra: Option<ExtraClaims>,
    ) -> Result<String, AuthError> {
        self.issue_with_lifetime(subject, role, token_type, extra, self.lifetime(token_type))
    }

    pub fn issue_with_lifetime(
        &self,
        subject: &str,
        role: Role,
        token_type: TokenType,
        extra: Option<ExtraClaims>,
        lifetime: Duration,
    ) -> Result<String, AuthError> {
        self.sign(subject, role, token_type, extra, lifetime)
            .map(|(token, _)| token)
    }

    /// Like [`issue`](Self::issue) but also hands back the signed claims
    pub fn issue_with_claims(
        &self,
        subject: &str,
        role: Role,
        token_type: TokenType,
        extra: Option<ExtraClaims>,
    ) -> Result<(String, Claims), AuthError> {
        self.sign(subject, role, token_type, extra, self.lifetime(token_type))
    }

    fn sign(
        &self,
        subject: &str,
        role: Role,
        token_type: TokenType,
        extra: Option<ExtraClaims>,
        lifetime: Duration,
    ) -> Result<(String, Claims), AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            role,
            token_type,
            iat: now,
            exp: now + lifetime.as_secs() as i64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
            extra: extra.unwrap_or_default(),
        };

        let token = encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("JWT signing failed: {e}")))?;

        debug!(jti = %claims.jti, %token_type, "Issued token");
        Ok((token, claims))
    }

    /// Verify signature, algorithm, issuer, audience and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(token, !self.ignore_expiration)
    }

    /// [`verify`](Self::verify) plus a check that the token was issued for `expected`
    pub fn verify_as(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            debug!(got = %claims.token_type, %expected, "Token type mismatch");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Signature-checked decode that tolerates expiry; used to read `exp` on logout
    pub fn decode_allow_expired(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(token, false)
    }

    fn decode_with(&self, token: &str, validate_exp: bool) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.validate_exp = validate_exp;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }
}

/// SHA-256 fingerprint used to refer to a token without storing it
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
