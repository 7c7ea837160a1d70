use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use lecture_core::{Clock, SystemClock};

use super::{RateLimitStore, RateLimitStoreError};

const DEFAULT_SWEEP_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: DateTime<Utc>,
}

/// Process-local counters.
///
/// Serves as the degraded fallback when the shared store is unreachable, or
/// as the only store in single-instance setups. Expired entries are read as
/// absent and removed by a sweep every `sweep_every` increments.
pub struct LocalRateLimitStore {
    counters: Mutex<HashMap<String, Counter>>,
    ops: AtomicU64,
    sweep_every: u64,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for LocalRateLimitStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalRateLimitStore")
            .field("entries", &self.len())
            .field("sweep_every", &self.sweep_every)
            .finish()
    }
}

impl Default for LocalRateLimitStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl LocalRateLimitStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            ops: AtomicU64::new(0),
            sweep_every: DEFAULT_SWEEP_EVERY,
            clock,
        }
    }

    pub fn with_sweep_every(mut self, every: u64) -> Self {
        self.sweep_every = every.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.counters.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(counters: &mut HashMap<String, Counter>, now: DateTime<Utc>) {
        let before = counters.len();
        counters.retain(|_, c| c.expires_at > now);
        let evicted = before - counters.len();
        if evicted > 0 {
            debug!(evicted, remaining = counters.len(), "swept expired rate limit counters");
        }
    }
}

fn poisoned() -> RateLimitStoreError {
    RateLimitStoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl RateLimitStore for LocalRateLimitStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, RateLimitStoreError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(window)
            .map_err(|e| RateLimitStoreError::Unavailable(e.to_string()))?;

        let mut counters = self.counters.lock().map_err(|_| poisoned())?;

        let ops = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % self.sweep_every == 0 {
            Self::sweep(&mut counters, now);
        }

        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        if counter.expires_at <= now {
            *counter = Counter {
                count: 0,
                expires_at: now + ttl,
            };
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitStoreError> {
        self.counters.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_core::ManualClock;

    fn store() -> (Arc<ManualClock>, LocalRateLimitStore) {
        let clock = Arc::new(ManualClock::default());
        let store = LocalRateLimitStore::new(clock.clone()).with_sweep_every(4);
        (clock, store)
    }

    #[tokio::test]
    async fn counts_per_key() {
        let (_, store) = store();
        let w = Duration::from_secs(60);
        assert_eq!(store.increment("a", w).await.unwrap(), 1);
        assert_eq!(store.increment("a", w).await.unwrap(), 2);
        assert_eq!(store.increment("b", w).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let (clock, store) = store();
        let w = Duration::from_secs(60);
        store.increment("a", w).await.unwrap();
        store.increment("a", w).await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(store.increment("a", w).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries() {
        let (clock, store) = store();
        let w = Duration::from_secs(10);
        store.increment("k1", w).await.unwrap();
        store.increment("k2", w).await.unwrap();
        store.increment("k3", w).await.unwrap();
        assert_eq!(store.len(), 3);

        clock.advance(chrono::Duration::seconds(11));
        // Fourth increment triggers the sweep.
        store.increment("k4", w).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn reset_forgets_key() {
        let (_, store) = store();
        let w = Duration::from_secs(60);
        store.increment("a", w).await.unwrap();
        store.reset("a").await.unwrap();
        assert_eq!(store.increment("a", w).await.unwrap(), 1);
    }
}
