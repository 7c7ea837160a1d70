//! Transport credential cookie policy.
//!
//! The cookie carries only the opaque token id. Rendering into an HTTP header
//! is done by the API layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TokenId;

pub const DEFAULT_SESSION_COOKIE: &str = "session";
pub const DEVICE_ID_COOKIE: &str = "device_id";
/// Lifetime of the `device_id` cookie (refreshed on every request).
pub const DEVICE_ID_MAX_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    pub name: String,
    /// Scope of the cookie (the API root).
    pub path: String,
    /// `false` only in local environments served over plain HTTP.
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookiePolicy {
    pub fn new(name: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            secure,
            same_site: SameSite::Strict,
        }
    }

    /// Cookie delivering a freshly issued or renewed session.
    pub fn issue(&self, token_id: &TokenId, ttl: Duration) -> SessionCookie {
        self.build(token_id.as_str().to_string(), ttl)
    }

    /// Expiring cookie that removes the credential from the client.
    pub fn clear(&self) -> SessionCookie {
        self.build(String::new(), Duration::ZERO)
    }

    /// Long-lived device identifier cookie.
    pub fn device(&self, device_id: impl Into<String>) -> SessionCookie {
        SessionCookie {
            name: DEVICE_ID_COOKIE.to_string(),
            value: device_id.into(),
            path: "/".to_string(),
            http_only: true,
            secure: self.secure,
            same_site: self.same_site,
            max_age: DEVICE_ID_MAX_AGE,
        }
    }

    fn build(&self, value: String, max_age: Duration) -> SessionCookie {
        SessionCookie {
            name: self.name.clone(),
            value,
            path: self.path.clone(),
            http_only: true,
            secure: self.secure,
            same_site: self.same_site,
            max_age,
        }
    }
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_COOKIE, "/", true)
    }
}

/// Fully specified cookie ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Mirrors the session TTL; zero clears the cookie.
    pub max_age: Duration,
}

impl SessionCookie {
    pub fn is_removal(&self) -> bool {
        self.max_age.is_zero()
    }
}
