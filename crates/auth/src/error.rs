//! Error taxonomy for the auth core.
//!
//! Every failure surfaced to the request layer is one of these variants. The
//! API crate maps them to status codes; nothing here knows about HTTP.

use std::time::Duration;

use thiserror::Error;

/// Why a credential was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("no session credential presented")]
    MissingCredential,

    #[error("session not found")]
    NotFound,

    #[error("session has expired")]
    Expired,

    #[error("session has been revoked")]
    Revoked,

    #[error("session is bound to a different device")]
    DeviceMismatch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing/invalid/expired/revoked/device-mismatched credential.
    #[error("unauthenticated: {0}")]
    Unauthenticated(AuthFailure),

    /// Fixed-window quota exhausted for the subject/action.
    #[error("rate limited (retry after {}s)", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Authenticated but neither owner nor holder of a bypass role.
    #[error("forbidden")]
    Forbidden,

    /// Resource absent at ownership-lookup time.
    ///
    /// Callers must surface this exactly like `Forbidden`.
    #[error("resource not found")]
    NotFound,

    /// A store or collaborator timed out or failed.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl AuthError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    /// `Forbidden` and `NotFound` are one opaque denial to the caller.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, AuthError::Forbidden | AuthError::NotFound)
    }

    /// Failures that must clear the transport cookie.
    pub fn clears_credential(&self) -> bool {
        matches!(self, AuthError::Unauthenticated(_))
    }
}

impl From<AuthFailure> for AuthError {
    fn from(value: AuthFailure) -> Self {
        AuthError::Unauthenticated(value)
    }
}
