//! Configuration loaded from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `SESSION_TTL_SECS` | `3600` |
//! | `SESSION_MAX_LIFETIME_SECS` | `86400` (renewal never extends a session past this age) |
//! | `SESSION_COOKIE_NAME` | `session` |
//! | `API_ROOT_PATH` | `/` |
//! | `APP_ENV` | `production` (`local` drops the `Secure` cookie flag) |
//! | `SESSION_SINGLE` | `true` |
//! | `REDIS_URL` | unset: local rate limiting, no Redis token store |
//! | `DATABASE_URL` | unset: in-memory token store |
//! | `TOKEN_STORE` | `postgres` if `DATABASE_URL` is set, else `redis` if `REDIS_URL` is set, else `memory` |
//! | `USER_SERVICE_URL` | unset: in-process user directory |
//! | `RATE_LIMIT_FALLBACK_ENABLED` | `true` |
//! | `STORE_TIMEOUT_MS` | `250` (must be > 0) |
//! | `LOOKUP_TIMEOUT_MS` | `500` (must be > 0) |
//! | `PRIMARY_RETRY_INTERVAL_SECS` | `5` |
//! | `RATE_LIMIT_LOGIN_PHONE` | `5/3600` |
//! | `RATE_LIMIT_LOGIN_DEVICE` | `5/3600` |
//! | `RATE_LIMIT_LOGIN_IP` | `100/3600` |
//! | `RATE_LIMIT_API` | `600/60` |

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lecture_auth::RateLimitRule;
use lecture_auth::cookie::DEFAULT_SESSION_COOKIE;

use crate::rate_limit::actions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStoreKind {
    Memory,
    Postgres,
    Redis,
}

const RATE_LIMIT_VARS: [(&str, &str); 4] = [
    ("RATE_LIMIT_LOGIN_PHONE", actions::LOGIN_PHONE),
    ("RATE_LIMIT_LOGIN_DEVICE", actions::LOGIN_DEVICE),
    ("RATE_LIMIT_LOGIN_IP", actions::LOGIN_IP),
    ("RATE_LIMIT_API", actions::API),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub bind_addr: String,
    pub session_ttl: Duration,
    pub session_max_lifetime: Duration,
    pub cookie_name: String,
    pub api_root_path: String,
    pub secure_cookies: bool,
    pub single_session: bool,
    pub token_store: TokenStoreKind,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub user_service_url: Option<String>,
    pub rate_limit_fallback_enabled: bool,
    pub store_timeout: Duration,
    pub lookup_timeout: Duration,
    pub primary_retry_interval: Duration,
    pub rate_limits: HashMap<String, RateLimitRule>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            session_ttl: Duration::from_secs(3600),
            session_max_lifetime: Duration::from_secs(24 * 3600),
            cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            api_root_path: "/".to_string(),
            secure_cookies: true,
            single_session: true,
            token_store: TokenStoreKind::Memory,
            redis_url: None,
            database_url: None,
            user_service_url: None,
            rate_limit_fallback_enabled: true,
            store_timeout: Duration::from_millis(250),
            lookup_timeout: Duration::from_millis(500),
            primary_retry_interval: Duration::from_secs(5),
            rate_limits: HashMap::from([
                (actions::LOGIN_PHONE.to_string(), RateLimitRule::per_hour(5)),
                (actions::LOGIN_DEVICE.to_string(), RateLimitRule::per_hour(5)),
                (actions::LOGIN_IP.to_string(), RateLimitRule::per_hour(100)),
                (actions::API.to_string(), RateLimitRule::per_minute(600)),
            ]),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(v) = get("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(secs) = parse::<u64>(&get, "SESSION_TTL_SECS")? {
            if secs == 0 {
                return Err(invalid("SESSION_TTL_SECS", "must be > 0"));
            }
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&get, "SESSION_MAX_LIFETIME_SECS")? {
            if secs == 0 {
                return Err(invalid("SESSION_MAX_LIFETIME_SECS", "must be > 0"));
            }
            cfg.session_max_lifetime = Duration::from_secs(secs);
        }
        if let Some(v) = get("SESSION_COOKIE_NAME") {
            cfg.cookie_name = v;
        }
        if let Some(v) = get("API_ROOT_PATH") {
            if !v.starts_with('/') {
                return Err(invalid("API_ROOT_PATH", "must start with '/'"));
            }
            cfg.api_root_path = v;
        }
        if let Some(env) = get("APP_ENV") {
            cfg.secure_cookies = !env.eq_ignore_ascii_case("local");
        }
        if let Some(v) = parse_bool(&get, "SESSION_SINGLE")? {
            cfg.single_session = v;
        }

        cfg.redis_url = get("REDIS_URL");
        cfg.database_url = get("DATABASE_URL");
        cfg.user_service_url = get("USER_SERVICE_URL");

        cfg.token_store = match get("TOKEN_STORE").as_deref() {
            Some("memory") => TokenStoreKind::Memory,
            Some("postgres") => TokenStoreKind::Postgres,
            Some("redis") => TokenStoreKind::Redis,
            Some(other) => {
                return Err(invalid("TOKEN_STORE", format!("unknown store '{other}'")));
            }
            None if cfg.database_url.is_some() => TokenStoreKind::Postgres,
            None if cfg.redis_url.is_some() => TokenStoreKind::Redis,
            None => TokenStoreKind::Memory,
        };
        if cfg.token_store == TokenStoreKind::Postgres && cfg.database_url.is_none() {
            return Err(invalid("DATABASE_URL", "required for TOKEN_STORE=postgres"));
        }
        if cfg.token_store == TokenStoreKind::Redis && cfg.redis_url.is_none() {
            return Err(invalid("REDIS_URL", "required for TOKEN_STORE=redis"));
        }

        if let Some(v) = parse_bool(&get, "RATE_LIMIT_FALLBACK_ENABLED")? {
            cfg.rate_limit_fallback_enabled = v;
        }
        if let Some(ms) = parse::<u64>(&get, "STORE_TIMEOUT_MS")? {
            if ms == 0 {
                return Err(invalid("STORE_TIMEOUT_MS", "must be > 0"));
            }
            cfg.store_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "LOOKUP_TIMEOUT_MS")? {
            if ms == 0 {
                return Err(invalid("LOOKUP_TIMEOUT_MS", "must be > 0"));
            }
            cfg.lookup_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&get, "PRIMARY_RETRY_INTERVAL_SECS")? {
            cfg.primary_retry_interval = Duration::from_secs(secs);
        }

        for (var, action) in RATE_LIMIT_VARS {
            if let Some(raw) = get(var) {
                let rule: RateLimitRule = raw.parse().map_err(|e| invalid(var, format!("{e}")))?;
                cfg.rate_limits.insert(action.to_string(), rule);
            }
        }

        Ok(cfg)
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    get(var)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(var, e.to_string())))
        .transpose()
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<bool>, ConfigError> {
    get(var)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got '{other}'"))),
        })
        .transpose()
}
