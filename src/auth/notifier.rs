//! Outbound account notifications
//!
//! Delivery (email, SMS) lives outside this crate. The auth flow hands each event to a
//! [`Notifier`] and never waits on or fails because of delivery.

use async_trait::async_trait;
use tracing::info;

/// Account event worth telling the user about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Welcome,
    /// Carries the email verification token
    Verification { token: String },
    /// Carries the password reset token
    PasswordReset { token: String },
    AccountLocked { minutes: i64 },
    PasswordChanged,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Verification { .. } => "verification",
            Self::PasswordReset { .. } => "password_reset",
            Self::AccountLocked { .. } => "account_locked",
            Self::PasswordChanged => "password_changed",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, email: &str, notification: Notification);
}

/// Logs each notification without its token
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, email: &str, notification: Notification) {
        info!(%email, kind = notification.kind(), "Notification queued");
    }
}
