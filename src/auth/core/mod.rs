//! Credential primitives: tokens, passwords and server-side token state

pub mod password_service;
pub mod token_service;
pub mod token_store;

pub use password_service::PasswordService;
pub use token_service::{fingerprint, Claims, ExtraClaims, TokenService, TokenType, CLOCK_SKEW_SECS};
pub use token_store::{DeviceSession, TokenStore};
