//! Infrastructure layer: token and rate-limit stores, the user-service
//! client, configuration, and the services composed from them (Session
//! Manager, Rate Limiter, Authorization Engine, request guard).

pub mod authorization;
pub mod config;
pub mod directory;
pub mod guard;
pub mod ownership;
pub mod rate_limit;
#[cfg(feature = "redis")]
pub mod redis_conn;
pub mod session;
pub mod token_store;


pub use authorization::AuthorizationEngine;
pub use config::{AuthConfig, ConfigError, TokenStoreKind};
pub use guard::{GuardOutcome, RequestGuard};
pub use session::{Authenticated, SessionManager};
