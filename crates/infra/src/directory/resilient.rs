//! Timeout, bounded retry and a consecutive-failure circuit breaker around a
//! `PrincipalResolver`.
//!
//! While the breaker is open, calls fail immediately with `Unavailable`
//! until `open_for` elapses; the next call is a trial that closes the
//! breaker on success or reopens it on failure.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use lecture_auth::Principal;
use lecture_core::PrincipalId;

use super::{DirectoryError, PrincipalResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub timeout: Duration,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    pub failure_threshold: u32,
    pub open_for: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            retries: 1,
            failure_threshold: 5,
            open_for: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct ResilientResolver<R> {
    inner: R,
    config: ResilienceConfig,
    state: Mutex<BreakerState>,
}

impl<R> ResilientResolver<R> {
    pub fn new(inner: R, config: ResilienceConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.open_until.is_some_and(|until| Instant::now() < until))
            .unwrap_or(true)
    }

    fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.config.failure_threshold {
                warn!(
                    failures = state.consecutive_failures,
                    open_for_ms = self.config.open_for.as_millis() as u64,
                    "user service circuit opened"
                );
                state.open_until = Some(Instant::now() + self.config.open_for);
            }
        }
    }
}

#[async_trait]
impl<R> PrincipalResolver for ResilientResolver<R>
where
    R: PrincipalResolver,
{
    async fn resolve(&self, principal_id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        if self.is_open() {
            return Err(DirectoryError::Unavailable("circuit open".to_string()));
        }

        let mut last = DirectoryError::Unavailable("no attempt made".to_string());
        for attempt in 0..=self.config.retries {
            match tokio::time::timeout(self.config.timeout, self.inner.resolve(principal_id)).await {
                Ok(Ok(found)) => {
                    self.record_success();
                    return Ok(found);
                }
                // A malformed answer will not improve on retry.
                Ok(Err(e @ DirectoryError::InvalidResponse(_))) => {
                    self.record_failure();
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "principal resolution failed");
                    last = e;
                }
                Err(_) => {
                    warn!(attempt, "principal resolution timed out");
                    last = DirectoryError::Unavailable("timed out".to_string());
                }
            }
        }
        self.record_failure();
        Err(last)
    }
}
