//! Session Manager: issues, validates, renews and revokes device-bound
//! sessions over a `TokenStore`.
//!
//! Every store call runs under `store_timeout` and every principal lookup
//! under `resolve_timeout`; a timeout or dependency error becomes
//! `AuthError::DependencyUnavailable` and the request is denied.
//!
//! Renewal slides the expiry forward but never past `issued_at +
//! max_lifetime`, so a stolen token cannot be kept alive indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use lecture_auth::{
    AuthError, AuthFailure, CookiePolicy, DeviceFingerprint, Principal, Session, SessionCookie,
    TokenId, check_session,
};
use lecture_core::{Clock, PrincipalId};

use crate::directory::PrincipalResolver;
use crate::token_store::{TokenStore, TokenStoreError};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_millis(500);

/// A session that passed validation, with its resolved principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub session: Session,
    pub principal: Principal,
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    resolver: Arc<dyn PrincipalResolver>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_lifetime: Duration,
    store_timeout: Duration,
    resolve_timeout: Duration,
    cookies: CookiePolicy,
    single_session: bool,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .field("max_lifetime", &self.max_lifetime)
            .field("store_timeout", &self.store_timeout)
            .field("resolve_timeout", &self.resolve_timeout)
            .field("cookies", &self.cookies)
            .field("single_session", &self.single_session)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        resolver: Arc<dyn PrincipalResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            clock,
            ttl: DEFAULT_SESSION_TTL,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            cookies: CookiePolicy::default(),
            single_session: true,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Absolute cap on a session's life, counted from issue.
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_cookie_policy(mut self, cookies: CookiePolicy) -> Self {
        self.cookies = cookies;
        self
    }

    /// When set, issuing a session revokes the principal's earlier sessions.
    pub fn with_single_session(mut self, single: bool) -> Self {
        self.single_session = single;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    pub async fn issue(
        &self,
        principal_id: &PrincipalId,
        fingerprint: DeviceFingerprint,
    ) -> Result<Session, AuthError> {
        self.issue_with_ttl(principal_id, fingerprint, self.ttl).await
    }

    pub async fn issue_with_ttl(
        &self,
        principal_id: &PrincipalId,
        fingerprint: DeviceFingerprint,
        ttl: Duration,
    ) -> Result<Session, AuthError> {
        let ttl = chrono_duration(ttl.min(self.max_lifetime))?;

        let mut session = Session::new(principal_id.clone(), fingerprint.clone(), self.clock.now(), ttl);
        let revoked = match self.store_insert(&session).await {
            Err(TokenStoreError::Duplicate) => {
                // 256-bit collision; draw once more.
                session = Session::new(principal_id.clone(), fingerprint, self.clock.now(), ttl);
                self.store_insert(&session).await.map_err(store_error("insert"))?
            }
            other => other.map_err(store_error("insert"))?,
        };
        if revoked > 0 {
            info!(principal = %principal_id, revoked, "revoked previous sessions on login");
        }

        info!(
            principal = %principal_id,
            token = %session.token_id.redacted(),
            expires_at = %session.expires_at,
            "session issued"
        );
        Ok(session)
    }

    /// Validate a presented token for the presenting device.
    ///
    /// Check order: not found, revoked, expired, device. A device mismatch
    /// revokes the session before returning.
    pub async fn validate(
        &self,
        token_id: &TokenId,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Authenticated, AuthError> {
        let session = self.load_valid(token_id, fingerprint).await?;

        let principal = match tokio::time::timeout(
            self.resolve_timeout,
            self.resolver.resolve(&session.principal_id),
        )
        .await
        {
            Ok(result) => result.map_err(|e| AuthError::unavailable(e.to_string()))?,
            Err(_) => {
                warn!(
                    principal = %session.principal_id,
                    timeout_ms = self.resolve_timeout.as_millis() as u64,
                    "principal lookup timed out"
                );
                return Err(AuthError::unavailable("principal lookup timed out"));
            }
        };
        let Some(principal) = principal else {
            warn!(
                principal = %session.principal_id,
                token = %token_id.redacted(),
                "session principal no longer exists; revoking"
            );
            self.revoke(token_id).await?;
            return Err(AuthFailure::NotFound.into());
        };

        Ok(Authenticated { session, principal })
    }

    /// Extend a live session by the configured TTL from now, capped at
    /// `issued_at + max_lifetime`.
    pub async fn renew(
        &self,
        token_id: &TokenId,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Session, AuthError> {
        self.load_valid(token_id, fingerprint).await?;

        let now = self.clock.now();
        let ttl = chrono_duration(self.ttl)?;
        let max_lifetime = chrono_duration(self.max_lifetime)?;
        let extended = self
            .deadline("extend", self.store.extend(token_id, now, now + ttl, max_lifetime))
            .await?;

        match extended {
            Some(session) => {
                debug!(token = %token_id.redacted(), expires_at = %session.expires_at, "session renewed");
                Ok(session)
            }
            // Revoked or expired between the read and the conditional write.
            None => {
                let current = self.deadline("get", self.store.get(token_id)).await?;
                let failure = match current {
                    None => AuthFailure::NotFound,
                    Some(s) => check_session(&s, fingerprint, now)
                        .err()
                        .unwrap_or(AuthFailure::Revoked),
                };
                Err(failure.into())
            }
        }
    }

    /// Revoke one session. Unknown tokens are fine.
    pub async fn revoke(&self, token_id: &TokenId) -> Result<(), AuthError> {
        self.deadline("revoke", self.store.revoke(token_id)).await?;
        info!(token = %token_id.redacted(), "session revoked");
        Ok(())
    }

    /// Revoke every session of a principal (logout everywhere).
    pub async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, AuthError> {
        let revoked = self
            .deadline("revoke_all", self.store.revoke_all(principal_id))
            .await?;
        info!(principal = %principal_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Drop expired records from stores that do not expire them on their own.
    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let now = self.clock.now();
        self.deadline("purge_expired", self.store.purge_expired(now)).await
    }

    pub fn login_cookie(&self, session: &Session) -> SessionCookie {
        let remaining = session
            .remaining(self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.cookies.issue(&session.token_id, remaining)
    }

    pub fn clear_cookie(&self) -> SessionCookie {
        self.cookies.clear()
    }

    async fn load_valid(
        &self,
        token_id: &TokenId,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Session, AuthError> {
        let session = self
            .deadline("get", self.store.get(token_id))
            .await?
            .ok_or(AuthFailure::NotFound)?;

        match check_session(&session, fingerprint, self.clock.now()) {
            Ok(()) => Ok(session),
            Err(AuthFailure::DeviceMismatch) => {
                warn!(
                    principal = %session.principal_id,
                    token = %token_id.redacted(),
                    "session presented from a different device; revoking"
                );
                self.revoke(token_id).await?;
                Err(AuthFailure::DeviceMismatch.into())
            }
            Err(failure) => Err(failure.into()),
        }
    }

    /// Insert the session; in single-session mode the store revokes the
    /// principal's other live sessions in the same write. Returns how many
    /// were revoked.
    async fn store_insert(&self, session: &Session) -> Result<u64, TokenStoreError> {
        let write = async {
            if self.single_session {
                self.store.insert_exclusive(session).await
            } else {
                self.store.insert(session).await.map(|()| 0)
            }
        };
        match tokio::time::timeout(self.store_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TokenStoreError::Unavailable("timed out".to_string())),
        }
    }

    async fn deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, TokenStoreError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result.map_err(store_error(operation)),
            Err(_) => {
                warn!(operation, timeout_ms = self.store_timeout.as_millis() as u64, "token store timed out");
                Err(AuthError::unavailable(format!("token store {operation} timed out")))
            }
        }
    }
}

fn chrono_duration(value: Duration) -> Result<chrono::Duration, AuthError> {
    chrono::Duration::from_std(value)
        .map_err(|e| AuthError::unavailable(format!("invalid session duration: {e}")))
}

fn store_error(operation: &'static str) -> impl Fn(TokenStoreError) -> AuthError {
    move |e| {
        warn!(operation, error = %e, "token store failed");
        AuthError::unavailable(e.to_string())
    }
}
