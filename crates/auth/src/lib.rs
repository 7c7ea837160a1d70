//! `lecture-auth`: pure authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage: it owns the
//! session model, device fingerprinting, policy rules, fixed-window math,
//! cookie policy and the error taxonomy. Stores and collaborators live in
//! `lecture-infra`.

pub mod authorize;
pub mod cookie;
pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod principal;
pub mod rate_limit;
pub mod roles;
pub mod session;

pub use authorize::{AccessGrant, check_bypass, check_ownership};
pub use cookie::{CookiePolicy, SameSite, SessionCookie};
pub use error::{AuthError, AuthFailure};
pub use fingerprint::{DeviceFingerprint, RequestMetadata, fingerprint, resolve_client_ip};
pub use policy::{Action, OperationArgs, OwnerId, OwnershipCheck, PolicyRule, ResourceType};
pub use principal::Principal;
pub use rate_limit::{RateLimitDecision, RateLimitKey, RateLimitRule};
pub use roles::Role;
pub use session::{Session, TokenId, check_session};

pub use lecture_core::{GroupId, PrincipalId, ResourceId};
