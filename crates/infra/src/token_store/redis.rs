//! Redis-backed token store.
//!
//! Each session is a hash at `session:{token_id}`. The hash outlives the
//! session's `expires_at` by a retention period so that an expired or
//! revoked session still reads back as such instead of as unknown; Redis
//! drops it after that (`PEXPIREAT`). A set at `principal_sessions:{id}`
//! indexes a principal's tokens for `revoke_all`. Every mutation is one Lua
//! script, so it executes atomically on the server. `PEXPIRETIME` needs
//! Redis 7.
//!
//! The `revoke_all`, `insert` and `extend` scripts touch keys derived inside
//! the script, which requires a non-clustered deployment (or hash-tagged
//! keys).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{RedisError, Script};
use tracing::instrument;

use lecture_auth::{DeviceFingerprint, Session, TokenId};
use lecture_core::PrincipalId;

use super::{TokenStore, TokenStoreError};
use crate::redis_conn::RedisConnector;

const SESSION_PREFIX: &str = "session:";
const PRINCIPAL_PREFIX: &str = "principal_sessions:";

/// How long a session hash is kept past its expiry.
pub const DEFAULT_RETENTION: Duration = Duration::days(1);

// ARGV: 1 principal, 2 fingerprint, 3 issued_at, 4 expires_at, 5 revoked,
// 6 token, 7 retain_until, 8 session prefix, 9 exclusive flag.
// Returns -1 on a duplicate token, else the number of sessions revoked.
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return -1
end
local revoked = 0
if ARGV[9] == '1' then
  for _, token in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    local key = ARGV[8] .. token
    if redis.call('HGET', key, 'revoked') == '0' then
      redis.call('HSET', key, 'revoked', '1')
      revoked = revoked + 1
    end
  end
  redis.call('DEL', KEYS[2])
end
redis.call('HSET', KEYS[1],
  'principal_id', ARGV[1],
  'device_fingerprint', ARGV[2],
  'issued_at', ARGV[3],
  'expires_at', ARGV[4],
  'revoked', ARGV[5])
redis.call('PEXPIREAT', KEYS[1], ARGV[7])
redis.call('SADD', KEYS[2], ARGV[6])
if redis.call('PEXPIRETIME', KEYS[2]) < tonumber(ARGV[7]) then
  redis.call('PEXPIREAT', KEYS[2], ARGV[7])
end
return revoked
"#;

const REVOKE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], 'revoked', '1')
  return 1
end
return 0
"#;

// ARGV: 1 now, 2 requested expiry, 3 index prefix, 4 max lifetime,
// 5 retention (all milliseconds).
const EXTEND_SCRIPT: &str = r#"
local fields = redis.call('HMGET', KEYS[1], 'revoked', 'expires_at', 'principal_id', 'issued_at')
if fields[1] ~= '0' or not fields[2] or not fields[3] or not fields[4] then
  return {}
end
if tonumber(fields[2]) <= tonumber(ARGV[1]) then
  return {}
end
local expires_at = math.min(tonumber(ARGV[2]), tonumber(fields[4]) + tonumber(ARGV[4]))
local retain_until = string.format('%d', expires_at + tonumber(ARGV[5]))
redis.call('HSET', KEYS[1], 'expires_at', string.format('%d', expires_at))
redis.call('PEXPIREAT', KEYS[1], retain_until)
local index = ARGV[3] .. fields[3]
if redis.call('PEXPIRETIME', index) < tonumber(retain_until) then
  redis.call('PEXPIREAT', index, retain_until)
end
return redis.call('HGETALL', KEYS[1])
"#;

const REVOKE_ALL_SCRIPT: &str = r#"
local tokens = redis.call('SMEMBERS', KEYS[1])
local changed = 0
for _, token in ipairs(tokens) do
  local key = ARGV[1] .. token
  if redis.call('HGET', key, 'revoked') == '0' then
    redis.call('HSET', key, 'revoked', '1')
    changed = changed + 1
  end
end
redis.call('DEL', KEYS[1])
return changed
"#;

#[derive(Debug, Clone)]
pub struct RedisTokenStore {
    redis: RedisConnector,
    retention: Duration,
}

impl RedisTokenStore {
    pub fn new(redis: RedisConnector) -> Self {
        Self {
            redis,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep session hashes this long past their expiry.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, TokenStoreError> {
        let redis = RedisConnector::open(redis_url).map_err(|e| unavailable("open", e))?;
        Ok(Self::new(redis))
    }

    fn session_key(token_id: &TokenId) -> String {
        format!("{SESSION_PREFIX}{}", token_id.as_str())
    }

    fn principal_key(principal_id: &PrincipalId) -> String {
        format!("{PRINCIPAL_PREFIX}{}", principal_id.as_str())
    }

    async fn insert_with(
        &self,
        operation: &'static str,
        session: &Session,
        exclusive: bool,
    ) -> Result<u64, TokenStoreError> {
        let key = Self::session_key(&session.token_id);
        let index = Self::principal_key(&session.principal_id);
        let retain_until = (session.expires_at + self.retention).timestamp_millis();
        let revoked: i64 = self
            .run(operation, |mut conn| async move {
                Script::new(INSERT_SCRIPT)
                    .key(key)
                    .key(index)
                    .arg(session.principal_id.as_str())
                    .arg(session.device_fingerprint.as_str())
                    .arg(session.issued_at.timestamp_millis())
                    .arg(session.expires_at.timestamp_millis())
                    .arg(if session.revoked { "1" } else { "0" })
                    .arg(session.token_id.as_str())
                    .arg(retain_until)
                    .arg(SESSION_PREFIX)
                    .arg(if exclusive { "1" } else { "0" })
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        u64::try_from(revoked).map_err(|_| TokenStoreError::Duplicate)
    }

    async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T, TokenStoreError>
    where
        F: FnOnce(redis::aio::MultiplexedConnection) -> Fut,
        Fut: core::future::Future<Output = Result<T, RedisError>>,
    {
        let conn = self
            .redis
            .connection()
            .await
            .map_err(|e| unavailable(operation, e))?;
        match f(conn).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.redis.observe_error(&e).await;
                Err(unavailable(operation, e))
            }
        }
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    #[instrument(skip(self, session), fields(token = %session.token_id.redacted()), err)]
    async fn insert(&self, session: &Session) -> Result<(), TokenStoreError> {
        self.insert_with("insert", session, false).await.map(|_| ())
    }

    #[instrument(skip(self, session), fields(token = %session.token_id.redacted()), err)]
    async fn insert_exclusive(&self, session: &Session) -> Result<u64, TokenStoreError> {
        self.insert_with("insert_exclusive", session, true).await
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn get(&self, token_id: &TokenId) -> Result<Option<Session>, TokenStoreError> {
        let key = Self::session_key(token_id);
        let fields: HashMap<String, String> = self
            .run("get", |mut conn| async move {
                redis::cmd("HGETALL").arg(key).query_async(&mut conn).await
            })
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        session_from_fields(token_id.clone(), &fields).map(Some)
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn revoke(&self, token_id: &TokenId) -> Result<(), TokenStoreError> {
        let key = Self::session_key(token_id);
        let _: i64 = self
            .run("revoke", |mut conn| async move {
                Script::new(REVOKE_SCRIPT).key(key).invoke_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, TokenStoreError> {
        let index = Self::principal_key(principal_id);
        let changed: u64 = self
            .run("revoke_all", |mut conn| async move {
                Script::new(REVOKE_ALL_SCRIPT)
                    .key(index)
                    .arg(SESSION_PREFIX)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(changed)
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn extend(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        max_lifetime: Duration,
    ) -> Result<Option<Session>, TokenStoreError> {
        let key = Self::session_key(token_id);
        let retention = self.retention.num_milliseconds();
        let flat: Vec<String> = self
            .run("extend", |mut conn| async move {
                Script::new(EXTEND_SCRIPT)
                    .key(key)
                    .arg(now.timestamp_millis())
                    .arg(new_expires_at.timestamp_millis())
                    .arg(PRINCIPAL_PREFIX)
                    .arg(max_lifetime.num_milliseconds())
                    .arg(retention)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        if flat.is_empty() {
            return Ok(None);
        }
        let fields: HashMap<String, String> = flat
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        session_from_fields(token_id.clone(), &fields).map(Some)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, TokenStoreError> {
        // Redis drops session hashes once their retention ends.
        Ok(0)
    }
}

fn session_from_fields(
    token_id: TokenId,
    fields: &HashMap<String, String>,
) -> Result<Session, TokenStoreError> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| TokenStoreError::Corrupt(format!("missing field {name}")))
    };
    let millis = |name: &str| -> Result<DateTime<Utc>, TokenStoreError> {
        field(name)?
            .parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| TokenStoreError::Corrupt(format!("bad timestamp in {name}")))
    };

    Ok(Session {
        token_id,
        principal_id: PrincipalId::new(field("principal_id")?.clone()),
        device_fingerprint: DeviceFingerprint::from_raw(field("device_fingerprint")?.clone()),
        issued_at: millis("issued_at")?,
        expires_at: millis("expires_at")?,
        revoked: field("revoked")? != "0",
    })
}

fn unavailable(operation: &str, err: RedisError) -> TokenStoreError {
    TokenStoreError::Unavailable(format!("redis {operation}: {err}"))
}
