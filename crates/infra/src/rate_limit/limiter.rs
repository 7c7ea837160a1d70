//! Fixed-window Rate Limiter with a shared primary store and a local
//! degraded fallback.
//!
//! Decision flow per check:
//! 1. If the primary is considered healthy, increment there (deadline-bound),
//!    retrying exactly once.
//! 2. If both attempts fail, mark the primary unhealthy. While unhealthy the
//!    primary is skipped until the retry interval elapses.
//! 3. With fallback enabled the local store counts instead and the decision
//!    is flagged `degraded`; otherwise the check fails with
//!    `DependencyUnavailable`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use lecture_auth::{AuthError, RateLimitDecision, RateLimitKey, RateLimitRule};
use lecture_core::{Clock, SystemClock};

use super::{LocalRateLimitStore, RateLimitStore};

/// Action names used for rate-limit keys and rule lookup.
pub mod actions {
    pub const LOGIN_PHONE: &str = "login:phone";
    pub const LOGIN_DEVICE: &str = "login:device";
    pub const LOGIN_IP: &str = "login:ip";
    pub const API: &str = "api";
}

const PRIMARY_ATTEMPTS: usize = 2;

/// Tracks whether the primary store should be tried.
#[derive(Debug)]
pub struct PrimaryHealth {
    retry_interval: chrono::Duration,
    retry_at: Mutex<Option<DateTime<Utc>>>,
}

impl PrimaryHealth {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval: chrono::Duration::from_std(retry_interval)
                .unwrap_or_else(|_| chrono::Duration::seconds(5)),
            retry_at: Mutex::new(None),
        }
    }

    pub fn should_try(&self, now: DateTime<Utc>) -> bool {
        match self.retry_at.lock() {
            Ok(guard) => guard.is_none_or(|at| now >= at),
            Err(_) => true,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.retry_at.lock().map(|g| g.is_none()).unwrap_or(false)
    }

    fn mark_failed(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.retry_at.lock() {
            *guard = Some(now + self.retry_interval);
        }
    }

    fn mark_ok(&self) {
        if let Ok(mut guard) = self.retry_at.lock() {
            if guard.take().is_some() {
                debug!("rate limit primary store recovered");
            }
        }
    }
}

/// Subjects for the three login quotas.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginSubjects<'a> {
    pub login_id: &'a str,
    pub device_id: Option<&'a str>,
    pub ip: Option<&'a str>,
}

pub struct RateLimiter {
    primary: Option<Arc<dyn RateLimitStore>>,
    fallback: Arc<LocalRateLimitStore>,
    rules: HashMap<String, RateLimitRule>,
    default_rule: RateLimitRule,
    fallback_enabled: bool,
    timeout: Duration,
    health: PrimaryHealth,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("has_primary", &self.primary.is_some())
            .field("rules", &self.rules)
            .field("fallback_enabled", &self.fallback_enabled)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter counting only in the local store.
    pub fn local(clock: Arc<dyn Clock>) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(LocalRateLimitStore::new(clock.clone())),
            rules: default_rules(),
            default_rule: RateLimitRule::per_minute(600),
            fallback_enabled: true,
            timeout: Duration::from_millis(250),
            health: PrimaryHealth::new(Duration::from_secs(5)),
            clock,
        }
    }

    pub fn with_primary(mut self, primary: Arc<dyn RateLimitStore>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<LocalRateLimitStore>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_rule(mut self, action: impl Into<String>, rule: RateLimitRule) -> Self {
        self.rules.insert(action.into(), rule);
        self
    }

    pub fn with_rules(mut self, rules: HashMap<String, RateLimitRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_default_rule(mut self, rule: RateLimitRule) -> Self {
        self.default_rule = rule;
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.health = PrimaryHealth::new(interval);
        self
    }

    pub fn health(&self) -> &PrimaryHealth {
        &self.health
    }

    pub fn rule(&self, action: &str) -> RateLimitRule {
        self.rules.get(action).copied().unwrap_or(self.default_rule)
    }

    /// Count one request of `action` by `subject` against the action's rule.
    pub async fn check(&self, action: &str, subject: &str) -> Result<RateLimitDecision, AuthError> {
        let rule = self.rule(action);
        self.check_with(action, subject, &rule).await
    }

    pub async fn check_with(
        &self,
        action: &str,
        subject: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitDecision, AuthError> {
        let now = self.clock.now();
        let key = RateLimitKey::new(action, subject).windowed(rule, now);
        let (count, degraded) = self.increment(&key, rule.window, now).await?;

        let decision = RateLimitDecision::evaluate(count, rule, now, degraded);
        if !decision.allowed {
            warn!(
                action,
                count,
                limit = rule.limit,
                retry_after_secs = decision.retry_after.as_secs(),
                degraded,
                "rate limit exceeded"
            );
        }
        Ok(decision)
    }

    /// Apply the login quotas in order (login id, device, ip). Stops at the
    /// first rejection; otherwise returns the decision with the least
    /// headroom left.
    pub async fn check_login(
        &self,
        subjects: LoginSubjects<'_>,
    ) -> Result<RateLimitDecision, AuthError> {
        let mut checks = vec![(actions::LOGIN_PHONE, subjects.login_id)];
        if let Some(device) = subjects.device_id {
            checks.push((actions::LOGIN_DEVICE, device));
        }
        if let Some(ip) = subjects.ip {
            checks.push((actions::LOGIN_IP, ip));
        }

        let mut tightest: Option<RateLimitDecision> = None;
        let mut degraded = false;
        for (action, subject) in checks {
            let decision = self.check(action, subject).await?;
            degraded |= decision.degraded;
            if !decision.allowed {
                return Ok(RateLimitDecision { degraded, ..decision });
            }
            let replace = tightest
                .as_ref()
                .is_none_or(|t| decision.remaining() < t.remaining());
            if replace {
                tightest = Some(decision);
            }
        }
        // `checks` always holds the login-id entry, so `tightest` is set.
        let decision = tightest.ok_or_else(|| AuthError::unavailable("no login quota evaluated"))?;
        Ok(RateLimitDecision { degraded, ..decision })
    }

    /// Clear the login-id and device counters of the current window after a
    /// successful login. Failures are logged and ignored.
    pub async fn reset_login(&self, login_id: &str, device_id: Option<&str>) {
        let now = self.clock.now();
        let mut keys = vec![(actions::LOGIN_PHONE, login_id)];
        if let Some(device) = device_id {
            keys.push((actions::LOGIN_DEVICE, device));
        }
        for (action, subject) in keys {
            let rule = self.rule(action);
            let key = RateLimitKey::new(action, subject).windowed(&rule, now);
            if let Some(primary) = self.primary.as_ref().filter(|_| self.health.should_try(now)) {
                match tokio::time::timeout(self.timeout, primary.reset(&key)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(action, error = %e, "rate limit reset failed on primary"),
                    Err(_) => warn!(action, "rate limit reset timed out on primary"),
                }
            }
            if let Err(e) = self.fallback.reset(&key).await {
                warn!(action, error = %e, "rate limit reset failed on local store");
            }
        }
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<(u64, bool), AuthError> {
        let Some(primary) = self.primary.as_ref() else {
            let count = self
                .fallback
                .increment(key, window)
                .await
                .map_err(|e| AuthError::unavailable(e.to_string()))?;
            return Ok((count, false));
        };

        if self.health.should_try(now) {
            for attempt in 1..=PRIMARY_ATTEMPTS {
                match tokio::time::timeout(self.timeout, primary.increment(key, window)).await {
                    Ok(Ok(count)) => {
                        self.health.mark_ok();
                        return Ok((count, false));
                    }
                    Ok(Err(e)) => warn!(attempt, error = %e, "rate limit primary store failed"),
                    Err(_) => warn!(attempt, timeout_ms = self.timeout.as_millis() as u64, "rate limit primary store timed out"),
                }
            }
            self.health.mark_failed(now);
        }

        if !self.fallback_enabled {
            return Err(AuthError::unavailable("rate limit store unavailable"));
        }

        warn!("rate limiting in degraded mode (local counters)");
        let count = self
            .fallback
            .increment(key, window)
            .await
            .map_err(|e| AuthError::unavailable(e.to_string()))?;
        Ok((count, true))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::local(Arc::new(SystemClock))
    }
}

fn default_rules() -> HashMap<String, RateLimitRule> {
    HashMap::from([
        (actions::LOGIN_PHONE.to_string(), RateLimitRule::per_hour(5)),
        (actions::LOGIN_DEVICE.to_string(), RateLimitRule::per_hour(5)),
        (actions::LOGIN_IP.to_string(), RateLimitRule::per_hour(100)),
        (actions::API.to_string(), RateLimitRule::per_minute(600)),
    ])
}
