//! Token Store: the single source of truth for session validity.
//!
//! Implementations must make every mutation of one session a single atomic
//! store operation (conditional update), never a read-modify-write from the
//! caller, and must be shared across service instances in production so a
//! revocation is visible everywhere immediately.

pub mod in_memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use lecture_auth::{Session, TokenId};
use lecture_core::PrincipalId;

pub use in_memory::InMemoryTokenStore;
pub use postgres::PostgresTokenStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisTokenStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate token id")]
    Duplicate,

    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a newly issued session.
    async fn insert(&self, session: &Session) -> Result<(), TokenStoreError>;

    /// Revoke every live session of `session.principal_id` and persist
    /// `session`, as one atomic operation. Returns how many were revoked.
    ///
    /// On `Duplicate` nothing is revoked.
    async fn insert_exclusive(&self, session: &Session) -> Result<u64, TokenStoreError>;

    async fn get(&self, token_id: &TokenId) -> Result<Option<Session>, TokenStoreError>;

    /// Mark a session revoked. Idempotent; unknown ids are not an error.
    async fn revoke(&self, token_id: &TokenId) -> Result<(), TokenStoreError>;

    /// Revoke every live session of a principal. Returns how many changed.
    async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, TokenStoreError>;

    /// Move `expires_at` forward, only if the session is still live at `now`.
    ///
    /// The new expiry is `new_expires_at` capped at `issued_at +
    /// max_lifetime`. Returns the updated session, or `None` if the
    /// condition did not hold.
    async fn extend(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        max_lifetime: Duration,
    ) -> Result<Option<Session>, TokenStoreError>;

    /// Drop records expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenStoreError>;
}

#[async_trait]
impl<S> TokenStore for Arc<S>
where
    S: TokenStore + ?Sized,
{
    async fn insert(&self, session: &Session) -> Result<(), TokenStoreError> {
        (**self).insert(session).await
    }

    async fn insert_exclusive(&self, session: &Session) -> Result<u64, TokenStoreError> {
        (**self).insert_exclusive(session).await
    }

    async fn get(&self, token_id: &TokenId) -> Result<Option<Session>, TokenStoreError> {
        (**self).get(token_id).await
    }

    async fn revoke(&self, token_id: &TokenId) -> Result<(), TokenStoreError> {
        (**self).revoke(token_id).await
    }

    async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, TokenStoreError> {
        (**self).revoke_all(principal_id).await
    }

    async fn extend(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        max_lifetime: Duration,
    ) -> Result<Option<Session>, TokenStoreError> {
        (**self).extend(token_id, now, new_expires_at, max_lifetime).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenStoreError> {
        (**self).purge_expired(now).await
    }
}
