//! Shared Redis connection handle.
//!
//! Holds one multiplexed connection per client and reconnects lazily after
//! an IO failure. Cloning the handle shares the cached connection.

use std::sync::Arc;

use redis::RedisError;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RedisConnector {
    client: Arc<redis::Client>,
    cached: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl core::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisConnector").finish_non_exhaustive()
    }
}

impl RedisConnector {
    /// Open a client for `redis_url`. No connection is made until first use.
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, RedisError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client: Arc::new(client),
            cached: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut cached = self.cached.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection if `err` means it is no longer usable.
    pub async fn observe_error(&self, err: &RedisError) {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            self.cached.lock().await.take();
        }
    }
}
