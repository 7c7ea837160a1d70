//! Fixed-window rate limiting math.
//!
//! Windows are aligned to the Unix epoch: a window of `W` seconds containing
//! instant `t` starts at `floor(t / W) * W`. The window index is part of the
//! counter key, so every backend agrees on window boundaries and a counter
//! never carries over into the next window.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lecture_core::DomainError;

use crate::AuthError;

/// `limit` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_hour(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60 * 60))
    }

    pub fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    fn window_millis(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }

    /// Index of the window containing `now`.
    pub fn window_index(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().div_euclid(self.window_millis())
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start_ms = self.window_index(now) * self.window_millis();
        DateTime::<Utc>::from_timestamp_millis(start_ms).unwrap_or(now)
    }

    /// Time until the window containing `now` closes (`windowSize - elapsed`).
    pub fn retry_after(&self, now: DateTime<Utc>) -> Duration {
        let w = self.window_millis();
        let elapsed = now.timestamp_millis().rem_euclid(w);
        Duration::from_millis((w - elapsed) as u64)
    }
}

/// Parses `"<limit>/<window_secs>"`, e.g. `"5/3600"`.
impl FromStr for RateLimitRule {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (limit, window) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| DomainError::validation(format!("rate limit '{s}': expected limit/window_secs")))?;
        let limit: u64 = limit
            .trim()
            .parse()
            .map_err(|_| DomainError::validation(format!("rate limit '{s}': bad limit")))?;
        let window: u64 = window
            .trim()
            .parse()
            .map_err(|_| DomainError::validation(format!("rate limit '{s}': bad window")))?;
        if window == 0 {
            return Err(DomainError::validation(format!("rate limit '{s}': window must be > 0")));
        }
        Ok(Self::new(limit, Duration::from_secs(window)))
    }
}

/// Counter identity: action + subject (principal id, login id, device or IP).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    action: String,
    subject: String,
}

impl RateLimitKey {
    pub const PREFIX: &'static str = "rate_limit";

    pub fn new(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: subject.into(),
        }
    }

    /// Stable key without the window component.
    pub fn base(&self) -> String {
        format!("{}:{}:{}", Self::PREFIX, self.action, self.subject)
    }

    /// Store key for the window containing `now`.
    pub fn windowed(&self, rule: &RateLimitRule, now: DateTime<Utc>) -> String {
        format!("{}:{}", self.base(), rule.window_index(now))
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
    pub retry_after: Duration,
    /// Served by the process-local fallback because the shared store failed.
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn evaluate(count: u64, rule: &RateLimitRule, now: DateTime<Utc>, degraded: bool) -> Self {
        Self {
            allowed: count <= rule.limit,
            count,
            limit: rule.limit,
            retry_after: rule.retry_after(now),
            degraded,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }

    pub fn enforce(&self) -> Result<(), AuthError> {
        if self.allowed {
            Ok(())
        } else {
            Err(AuthError::RateLimited {
                retry_after: self.retry_after,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn parse_rule() {
        let rule: RateLimitRule = "5/3600".parse().unwrap();
        assert_eq!(rule, RateLimitRule::per_hour(5));
        assert!("5".parse::<RateLimitRule>().is_err());
        assert!("5/0".parse::<RateLimitRule>().is_err());
        assert!("x/60".parse::<RateLimitRule>().is_err());
    }

    #[test]
    fn windows_are_epoch_aligned() {
        let rule = RateLimitRule::per_minute(3);
        assert_eq!(rule.window_index(at(120)), 2);
        assert_eq!(rule.window_index(at(179)), 2);
        assert_eq!(rule.window_index(at(180)), 3);
        assert_eq!(rule.window_start(at(150)), at(120));
    }

    #[test]
    fn retry_after_is_window_minus_elapsed() {
        let rule = RateLimitRule::per_minute(3);
        assert_eq!(rule.retry_after(at(130)), Duration::from_secs(50));
        assert_eq!(rule.retry_after(at(120)), Duration::from_secs(60));
    }

    #[test]
    fn keys_embed_window() {
        let rule = RateLimitRule::per_minute(3);
        let key = RateLimitKey::new("login", "u1");
        assert_eq!(key.base(), "rate_limit:login:u1");
        assert_eq!(key.windowed(&rule, at(130)), "rate_limit:login:u1:2");
        assert_ne!(key.windowed(&rule, at(130)), key.windowed(&rule, at(180)));
    }

    #[test]
    fn decision_rejects_past_limit() {
        let rule = RateLimitRule::per_minute(3);
        let admitted: Vec<bool> = (1..=5)
            .map(|count| RateLimitDecision::evaluate(count, &rule, at(130), false).allowed)
            .collect();
        assert_eq!(admitted, vec![true, true, true, false, false]);

        let denied = RateLimitDecision::evaluate(4, &rule, at(130), false);
        assert_eq!(
            denied.enforce(),
            Err(AuthError::RateLimited {
                retry_after: Duration::from_secs(50)
            })
        );
    }

    proptest! {
        #[test]
        fn retry_after_never_exceeds_window(secs in 0i64..4_000_000_000, window in 1u64..86_400) {
            let rule = RateLimitRule::new(1, Duration::from_secs(window));
            let now = at(secs);
            let retry = rule.retry_after(now);
            prop_assert!(retry > Duration::ZERO);
            prop_assert!(retry <= rule.window);
            prop_assert!(rule.window_start(now) <= now);
        }
    }
}
