//! User authentication
//!
//! ## Layout
//!
//! ```text
//! auth/
//! ├── types.rs          # roles, user records, payloads
//! ├── errors.rs         # AuthError
//! ├── envelope.rs       # {success,data} / {success,error}
//! ├── config.rs         # configuration
//! ├── lockout.rs        # failed-login lockout policy
//! ├── rate_limit.rs     # cache-backed attempt counters
//! ├── notifier.rs       # outbound notifications
//! ├── service.rs        # AuthService (facade)
//! ├── core/
//! │   ├── token_service.rs
//! │   ├── password_service.rs
//! │   └── token_store.rs
//! ├── storage/
//! │   ├── trait.rs
//! │   ├── profiles.rs
//! │   └── memory.rs
//! └── api/
//!     ├── routes.rs
//!     └── handlers.rs
//! ```
//!
//! Requests flow API → service → storage/cache; every collaborator sits behind a trait.

pub mod api;
pub mod config;
pub mod core;
pub mod envelope;
pub mod errors;
pub mod lockout;
pub mod notifier;
pub mod rate_limit;
pub mod service;
pub mod storage;
pub mod types;

pub use api::create_auth_routes;
pub use config::AuthConfig;
pub use envelope::Envelope;
pub use errors::AuthError;
pub use notifier::{Notification, Notifier, TracingNotifier};
pub use service::AuthService;
pub use storage::{MemoryStore, UserRepository};
pub use types::{AuthResponse, LoginRequest, RegisterRequest, Role, UserStatus};
