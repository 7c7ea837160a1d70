//! Rate Limit Store backends and the Rate Limiter built on them.

pub mod limiter;
pub mod local;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use limiter::{LoginSubjects, PrimaryHealth, RateLimiter, actions};
pub use local::LocalRateLimitStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisRateLimitStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitStoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Counter storage for fixed windows.
///
/// `key` already embeds the window index, so a counter never spans two
/// windows. Implementations expire the key `window` after it was created.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically add one to `key` and return the new count.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitStoreError>;

    async fn reset(&self, key: &str) -> Result<(), RateLimitStoreError>;
}

#[async_trait]
impl<S> RateLimitStore for Arc<S>
where
    S: RateLimitStore + ?Sized,
{
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitStoreError> {
        (**self).increment(key, window).await
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitStoreError> {
        (**self).reset(key).await
    }
}
