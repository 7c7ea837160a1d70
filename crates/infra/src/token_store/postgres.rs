//! Postgres-backed token store.
//!
//! Every mutation is a single conditional `UPDATE`, so concurrent `revoke`
//! and `extend` calls on one session are serialized by the row lock and a
//! revocation can never be overwritten by a late renewal.
//!
//! `insert_exclusive` runs in one transaction holding a per-principal
//! advisory lock, so two concurrent logins of one principal serialize and
//! only the later session stays live.
//!
//! ## Error Mapping
//!
//! | SQLx Error | TokenStoreError |
//! |------------|-----------------|
//! | Database, code `23505` (unique violation) | `Duplicate` |
//! | Decode / ColumnNotFound | `Corrupt` |
//! | anything else (IO, pool closed/timeout, TLS) | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::instrument;

use lecture_auth::{DeviceFingerprint, Session, TokenId};
use lecture_core::PrincipalId;

use super::{TokenStore, TokenStoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS auth_sessions (
    token_id           TEXT PRIMARY KEY,
    principal_id       TEXT NOT NULL,
    device_fingerprint TEXT NOT NULL,
    issued_at          TIMESTAMPTZ NOT NULL,
    expires_at         TIMESTAMPTZ NOT NULL,
    revoked            BOOLEAN NOT NULL DEFAULT FALSE
)
"#;

const CREATE_PRINCIPAL_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS auth_sessions_principal_idx ON auth_sessions (principal_id)
"#;

const INSERT_SESSION: &str = r#"
INSERT INTO auth_sessions
    (token_id, principal_id, device_fingerprint, issued_at, expires_at, revoked)
VALUES ($1, $2, $3, $4, $5, $6)
"#;

const SESSION_COLUMNS: &str =
    "token_id, principal_id, device_fingerprint, issued_at, expires_at, revoked";

#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: Arc<PgPool>,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the sessions table and index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), TokenStoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        sqlx::query(CREATE_PRINCIPAL_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    #[instrument(skip(self, session), fields(token = %session.token_id.redacted()), err)]
    async fn insert(&self, session: &Session) -> Result<(), TokenStoreError> {
        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(token = %session.token_id.redacted()), err)]
    async fn insert_exclusive(&self, session: &Session) -> Result<u64, TokenStoreError> {
        let fail = |e: sqlx::Error| map_sqlx_error("insert_exclusive", e);
        let mut tx = self.pool.begin().await.map_err(fail)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(session.principal_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        let revoked = sqlx::query(
            "UPDATE auth_sessions SET revoked = TRUE WHERE principal_id = $1 AND revoked = FALSE",
        )
        .bind(session.principal_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(fail)?
        .rows_affected();
        // Dropping `tx` on a failed insert rolls the revocations back.
        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

        tx.commit().await.map_err(fail)?;
        Ok(revoked)
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn get(&self, token_id: &TokenId) -> Result<Option<Session>, TokenStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE token_id = $1"
        ))
        .bind(token_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn revoke(&self, token_id: &TokenId) -> Result<(), TokenStoreError> {
        sqlx::query("UPDATE auth_sessions SET revoked = TRUE WHERE token_id = $1")
            .bind(token_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("revoke", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, TokenStoreError> {
        let result = sqlx::query(
            "UPDATE auth_sessions SET revoked = TRUE WHERE principal_id = $1 AND revoked = FALSE",
        )
        .bind(principal_id.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, token_id), fields(token = %token_id.redacted()), err)]
    async fn extend(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        max_lifetime: Duration,
    ) -> Result<Option<Session>, TokenStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE auth_sessions
            SET expires_at = LEAST($3, issued_at + $4 * INTERVAL '1 millisecond')
            WHERE token_id = $1 AND revoked = FALSE AND expires_at > $2
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(token_id.as_str())
        .bind(now)
        .bind(new_expires_at)
        .bind(max_lifetime.num_milliseconds())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("extend", e))?;

        row.map(|r| session_from_row(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenStoreError> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(result.rows_affected())
    }
}

fn bind_session<'q>(
    query: Query<'q, Postgres, PgArguments>,
    session: &'q Session,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(session.token_id.as_str())
        .bind(session.principal_id.as_str())
        .bind(session.device_fingerprint.as_str())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.revoked)
}

fn session_from_row(row: &PgRow) -> Result<Session, TokenStoreError> {
    let corrupt = |e: sqlx::Error| TokenStoreError::Corrupt(e.to_string());

    let token_id: String = row.try_get("token_id").map_err(corrupt)?;
    let token_id = TokenId::from_transport(token_id)
        .ok_or_else(|| TokenStoreError::Corrupt("empty token_id".to_string()))?;

    Ok(Session {
        token_id,
        principal_id: PrincipalId::new(row.try_get::<String, _>("principal_id").map_err(corrupt)?),
        device_fingerprint: DeviceFingerprint::from_raw(
            row.try_get::<String, _>("device_fingerprint").map_err(corrupt)?,
        ),
        issued_at: row.try_get("issued_at").map_err(corrupt)?,
        expires_at: row.try_get("expires_at").map_err(corrupt)?,
        revoked: row.try_get("revoked").map_err(corrupt)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TokenStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                TokenStoreError::Duplicate
            } else {
                TokenStoreError::Unavailable(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                ))
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            TokenStoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => TokenStoreError::Unavailable(format!("{operation}: {other}")),
    }
}
