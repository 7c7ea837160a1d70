//! Authorization Engine: resource-ownership checks run before the guarded
//! operation.
//!
//! Decision steps:
//! 1. Resource id from the operation arguments (`rule.owner_param`)
//! 2. Bypass roles admit immediately
//! 3. Owner lookup (deadline-bound)
//! 4. Owner compared with the principal (or its group)
//!
//! A missing resource is reported as `NotFound`; the HTTP layer renders it
//! exactly like `Forbidden` so existence is not disclosed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use lecture_auth::{
    AccessGrant, AuthError, OperationArgs, PolicyRule, Principal, check_bypass, check_ownership,
};

use crate::ownership::{LookupError, OwnershipLookup};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct AuthorizationEngine {
    lookup: Arc<dyn OwnershipLookup>,
    timeout: Duration,
}

impl core::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    pub fn new(lookup: Arc<dyn OwnershipLookup>) -> Self {
        Self {
            lookup,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        rule: &PolicyRule,
        args: &OperationArgs,
    ) -> Result<AccessGrant, AuthError> {
        let Some(resource_id) = args.resource_id(rule) else {
            error!(
                resource_type = %rule.resource_type,
                action = %rule.action,
                owner_param = rule.owner_param,
                "policy rule names an argument the operation does not carry"
            );
            return Err(AuthError::Forbidden);
        };

        if let Some(role) = check_bypass(principal, rule) {
            debug!(
                principal = %principal.principal_id,
                role = %role,
                resource_type = %rule.resource_type,
                resource_id = %resource_id,
                "access granted by bypass role"
            );
            return Ok(AccessGrant::Bypass { role });
        }

        let owner = match tokio::time::timeout(
            self.timeout,
            self.lookup.resolve_owner(rule.resource_type, &resource_id),
        )
        .await
        {
            Ok(Ok(owner)) => owner,
            Ok(Err(LookupError::Unregistered(resource_type))) => {
                error!(resource_type = %resource_type, "no ownership lookup registered; denying");
                return Err(AuthError::Forbidden);
            }
            Ok(Err(e)) => {
                warn!(resource_type = %rule.resource_type, error = %e, "ownership lookup failed; denying");
                return Err(AuthError::unavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    resource_type = %rule.resource_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "ownership lookup timed out; denying"
                );
                return Err(AuthError::unavailable("ownership lookup timed out"));
            }
        };

        let decision = check_ownership(principal, rule, owner.as_ref());
        if let Err(e) = &decision {
            warn!(
                principal = %principal.principal_id,
                resource_type = %rule.resource_type,
                resource_id = %resource_id,
                action = %rule.action,
                reason = %e,
                "access denied"
            );
        }
        decision
    }

    /// Run `op` only if `principal` may perform `rule` on the resource named
    /// in `args`.
    pub async fn guard<T, E, F, Fut>(
        &self,
        principal: &Principal,
        rule: &PolicyRule,
        args: &OperationArgs,
        op: F,
    ) -> Result<T, E>
    where
        E: From<AuthError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.authorize(principal, rule, args).await?;
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use lecture_auth::{Action, OwnerId, ResourceType, Role};
    use lecture_core::ResourceId;

    use crate::ownership::{InMemoryOwnership, OwnershipRegistry};

    fn engine() -> AuthorizationEngine {
        let lectures = Arc::new(InMemoryOwnership::new());
        lectures.insert(ResourceType::Lecture, "42", "A");
        let groups = Arc::new(InMemoryOwnership::new());
        groups.insert(ResourceType::Group, "g1", "g1");
        let registry = OwnershipRegistry::new()
            .register(ResourceType::Lecture, lectures)
            .register(ResourceType::Group, groups);
        AuthorizationEngine::new(Arc::new(registry))
    }

    fn lecture_args(id: &str) -> OperationArgs {
        OperationArgs::new().with("lecture_id", id)
    }

    #[tokio::test]
    async fn owner_allowed_other_denied_admin_bypasses() {
        let engine = engine();
        let rule = PolicyRule::lecture(Action::Update);

        let a = Principal::new("A");
        assert_eq!(
            engine.authorize(&a, &rule, &lecture_args("42")).await,
            Ok(AccessGrant::Owner)
        );

        let b = Principal::new("B");
        assert_eq!(
            engine.authorize(&b, &rule, &lecture_args("42")).await,
            Err(AuthError::Forbidden)
        );

        let admin = Principal::new("B").with_role(Role::ADMIN);
        assert_eq!(
            engine.authorize(&admin, &rule, &lecture_args("42")).await,
            Ok(AccessGrant::Bypass { role: Role::ADMIN })
        );
    }

    #[tokio::test]
    async fn missing_resource_and_missing_argument() {
        let engine = engine();
        let rule = PolicyRule::lecture(Action::Read);
        let a = Principal::new("A");

        let err = engine.authorize(&a, &rule, &lecture_args("404")).await.unwrap_err();
        assert_eq!(err, AuthError::NotFound);
        assert!(err.is_access_denied());

        let err = engine.authorize(&a, &rule, &OperationArgs::new()).await.unwrap_err();
        assert_eq!(err, AuthError::Forbidden);
    }

    #[tokio::test]
    async fn group_rules_compare_the_principals_group() {
        let engine = engine();
        let rule = PolicyRule::group(Action::Manage);
        let args = OperationArgs::new().with("group_id", "g1");

        let member = Principal::new("u1").with_group("g1");
        assert!(engine.authorize(&member, &rule, &args).await.is_ok());

        let outsider = Principal::new("u2").with_group("g2");
        assert_eq!(engine.authorize(&outsider, &rule, &args).await, Err(AuthError::Forbidden));

        let no_group = Principal::new("u3");
        assert_eq!(engine.authorize(&no_group, &rule, &args).await, Err(AuthError::Forbidden));
    }

    #[tokio::test]
    async fn unregistered_resource_type_denies() {
        let engine = engine();
        let rule = PolicyRule::user(Action::Read);
        let args = OperationArgs::new().with("user_id", "u1");
        assert_eq!(
            engine.authorize(&Principal::new("u1"), &rule, &args).await,
            Err(AuthError::Forbidden)
        );
    }

    struct SlowLookup;

    #[async_trait]
    impl OwnershipLookup for SlowLookup {
        async fn resolve_owner(
            &self,
            _: ResourceType,
            _: &ResourceId,
        ) -> Result<Option<OwnerId>, LookupError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Some(OwnerId::new("A")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_timeout_denies() {
        let engine = AuthorizationEngine::new(Arc::new(SlowLookup));
        let err = engine
            .authorize(&Principal::new("A"), &PolicyRule::lecture(Action::Read), &lecture_args("42"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DependencyUnavailable(_)));
    }

    #[tokio::test]
    async fn guard_runs_operation_only_after_approval() {
        let engine = engine();
        let rule = PolicyRule::lecture(Action::Delete);
        let ran = AtomicBool::new(false);

        let denied: Result<(), AuthError> = engine
            .guard(&Principal::new("B"), &rule, &lecture_args("42"), || async {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(denied, Err(AuthError::Forbidden));
        assert!(!ran.load(Ordering::SeqCst));

        let allowed: Result<&str, AuthError> = engine
            .guard(&Principal::new("A"), &rule, &lecture_args("42"), || async { Ok("deleted") })
            .await;
        assert_eq!(allowed, Ok("deleted"));
    }
}
