//! Redis Rate Limit Store.
//!
//! `INCR` and `PEXPIRE .. NX` run in one `MULTI/EXEC` transaction so the
//! expiry is set together with the first increment and never dropped if the
//! client dies between calls. `NX` needs Redis 7.

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use super::{RateLimitStore, RateLimitStoreError};
use crate::redis_conn::RedisConnector;

#[derive(Debug, Clone)]
pub struct RedisRateLimitStore {
    redis: RedisConnector,
}

impl RedisRateLimitStore {
    pub fn new(redis: RedisConnector) -> Self {
        Self { redis }
    }

    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, RateLimitStoreError> {
        let redis = RedisConnector::open(redis_url)
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;
        Ok(Self::new(redis))
    }

    async fn fail(&self, err: redis::RedisError) -> RateLimitStoreError {
        self.redis.observe_error(&err).await;
        RateLimitStoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    #[instrument(skip(self), err)]
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitStoreError> {
        let mut conn = match self.redis.connection().await {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(e).await),
        };
        let window_ms = (window.as_millis() as u64).max(1);

        let result: Result<(u64,), _> = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count,)) => Ok(count),
            Err(e) => Err(self.fail(e).await),
        }
    }

    #[instrument(skip(self), err)]
    async fn reset(&self, key: &str) -> Result<(), RateLimitStoreError> {
        let mut conn = match self.redis.connection().await {
            Ok(conn) => conn,
            Err(e) => return Err(self.fail(e).await),
        };
        let result: Result<(), _> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }
}
