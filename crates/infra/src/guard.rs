//! Request guard chain: validate session, then rate-limit, then authorize.
//! The first failing step short-circuits the chain.

use std::sync::Arc;

use tracing::debug;

use lecture_auth::{
    AccessGrant, AuthError, AuthFailure, DeviceFingerprint, OperationArgs, PolicyRule, Principal,
    RateLimitDecision, Session, TokenId,
};

use crate::authorization::AuthorizationEngine;
use crate::rate_limit::{RateLimiter, actions};
use crate::session::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub principal: Principal,
    pub session: Session,
    pub rate_limit: RateLimitDecision,
    pub grant: Option<AccessGrant>,
}

impl GuardOutcome {
    /// Whether the rate-limit decision came from the local fallback.
    pub fn degraded(&self) -> bool {
        self.rate_limit.degraded
    }
}

#[derive(Debug, Clone)]
pub struct RequestGuard {
    sessions: Arc<SessionManager>,
    limiter: Arc<RateLimiter>,
    authz: Arc<AuthorizationEngine>,
}

impl RequestGuard {
    pub fn new(
        sessions: Arc<SessionManager>,
        limiter: Arc<RateLimiter>,
        authz: Arc<AuthorizationEngine>,
    ) -> Self {
        Self {
            sessions,
            limiter,
            authz,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Session validation and rate limiting, without an ownership check.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
        fingerprint: &DeviceFingerprint,
    ) -> Result<GuardOutcome, AuthError> {
        let token = token
            .and_then(TokenId::from_transport)
            .ok_or(AuthFailure::MissingCredential)?;

        let authenticated = self.sessions.validate(&token, fingerprint).await?;

        let decision = self
            .limiter
            .check(actions::API, authenticated.principal.principal_id.as_str())
            .await?;
        decision.enforce()?;

        debug!(
            principal = %authenticated.principal.principal_id,
            remaining = decision.remaining(),
            degraded = decision.degraded,
            "request authenticated"
        );

        Ok(GuardOutcome {
            principal: authenticated.principal,
            session: authenticated.session,
            rate_limit: decision,
            grant: None,
        })
    }

    /// Full chain for an operation protected by `rule`.
    pub async fn check(
        &self,
        token: Option<&str>,
        fingerprint: &DeviceFingerprint,
        rule: &PolicyRule,
        args: &OperationArgs,
    ) -> Result<GuardOutcome, AuthError> {
        let mut outcome = self.authenticate(token, fingerprint).await?;
        outcome.grant = Some(self.authz.authorize(&outcome.principal, rule, args).await?);
        Ok(outcome)
    }
}
