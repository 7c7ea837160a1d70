//! Service wiring: token store, rate limiter, user directory, ownership
//! registry and the request guard, selected from `AuthConfig` at startup.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use lecture_auth::{CookiePolicy, ResourceType};
use lecture_core::{Clock, SystemClock};
use lecture_infra::directory::{
    CredentialVerifier, DirectoryError, HttpUserDirectory, InMemoryUserDirectory, PrincipalResolver,
    ResilienceConfig, ResilientResolver,
};
use lecture_infra::ownership::OwnershipRegistry;
use lecture_infra::rate_limit::{RateLimitStoreError, RateLimiter};
use lecture_infra::token_store::{InMemoryTokenStore, PostgresTokenStore, TokenStore, TokenStoreError};
use lecture_infra::{AuthConfig, AuthorizationEngine, RequestGuard, SessionManager, TokenStoreKind};

use crate::app::catalog::Catalog;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),

    #[error(transparent)]
    RateLimitStore(#[from] RateLimitStoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("{0}")]
    Unsupported(String),
}

/// Everything a request handler needs, shared behind one `Arc`.
pub struct AppServices {
    guard: RequestGuard,
    authz: Arc<AuthorizationEngine>,
    verifier: Arc<dyn CredentialVerifier>,
    catalog: Arc<Catalog>,
    api_root_path: String,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("guard", &self.guard)
            .field("api_root_path", &self.api_root_path)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Assemble services from already constructed collaborators.
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn TokenStore>,
        resolver: Arc<dyn PrincipalResolver>,
        verifier: Arc<dyn CredentialVerifier>,
        limiter: RateLimiter,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cookies = CookiePolicy::new(
            config.cookie_name.clone(),
            config.api_root_path.clone(),
            config.secure_cookies,
        );
        let sessions = SessionManager::new(store, resolver, clock)
            .with_ttl(config.session_ttl)
            .with_max_lifetime(config.session_max_lifetime)
            .with_store_timeout(config.store_timeout)
            .with_resolve_timeout(config.lookup_timeout)
            .with_cookie_policy(cookies)
            .with_single_session(config.single_session);

        let registry = OwnershipRegistry::new()
            .register(ResourceType::Lecture, catalog.clone())
            .register(ResourceType::Group, catalog.clone())
            .register(ResourceType::User, catalog.clone());
        let authz =
            Arc::new(AuthorizationEngine::new(Arc::new(registry)).with_timeout(config.lookup_timeout));

        let guard = RequestGuard::new(Arc::new(sessions), Arc::new(limiter), authz.clone());

        Self {
            guard,
            authz,
            verifier,
            catalog,
            api_root_path: config.api_root_path.clone(),
        }
    }

    /// Fully in-process services over `directory` (tests and local runs).
    pub fn in_memory(
        config: &AuthConfig,
        directory: Arc<InMemoryUserDirectory>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = local_limiter(config, clock.clone());
        Self::new(
            config,
            Arc::new(InMemoryTokenStore::new()),
            directory.clone(),
            directory,
            limiter,
            catalog,
            clock,
        )
    }

    pub fn guard(&self) -> &RequestGuard {
        &self.guard
    }

    pub fn sessions(&self) -> &SessionManager {
        self.guard.sessions()
    }

    pub fn limiter(&self) -> &RateLimiter {
        self.guard.limiter()
    }

    pub fn authz(&self) -> Arc<AuthorizationEngine> {
        self.authz.clone()
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        self.sessions().cookie_policy()
    }

    pub fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn api_root_path(&self) -> &str {
        &self.api_root_path
    }
}

/// Build services for the process from configuration.
pub async fn build_services(config: &AuthConfig) -> Result<AppServices, StartupError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = token_store(config).await?;
    let limiter = rate_limiter(config, clock.clone())?;

    let resolver: Arc<dyn PrincipalResolver>;
    let verifier: Arc<dyn CredentialVerifier>;
    match &config.user_service_url {
        Some(url) => {
            info!(url = %url, "using remote user service");
            let directory = Arc::new(HttpUserDirectory::new(url.clone(), config.lookup_timeout)?);
            let resilience = ResilienceConfig {
                timeout: config.lookup_timeout,
                ..ResilienceConfig::default()
            };
            resolver = Arc::new(ResilientResolver::new(directory.clone(), resilience));
            verifier = directory;
        }
        None => {
            warn!("USER_SERVICE_URL not set; using an empty in-process user directory");
            let directory = Arc::new(InMemoryUserDirectory::new());
            resolver = directory.clone();
            verifier = directory;
        }
    }

    Ok(AppServices::new(
        config,
        store,
        resolver,
        verifier,
        limiter,
        Arc::new(Catalog::new()),
        clock,
    ))
}

async fn token_store(config: &AuthConfig) -> Result<Arc<dyn TokenStore>, StartupError> {
    match config.token_store {
        TokenStoreKind::Memory => {
            warn!("using in-memory token store; sessions are not shared between instances");
            Ok(Arc::new(InMemoryTokenStore::new()))
        }
        TokenStoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| StartupError::Unsupported("DATABASE_URL is not set".to_string()))?;
            let pool = sqlx::PgPool::connect(url).await?;
            let store = PostgresTokenStore::new(pool);
            store.ensure_schema().await?;
            info!("using postgres token store");
            Ok(Arc::new(store))
        }
        TokenStoreKind::Redis => redis_token_store(config),
    }
}

#[cfg(feature = "redis")]
fn redis_token_store(config: &AuthConfig) -> Result<Arc<dyn TokenStore>, StartupError> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| StartupError::Unsupported("REDIS_URL is not set".to_string()))?;
    info!("using redis token store");
    Ok(Arc::new(lecture_infra::token_store::RedisTokenStore::open(url)?))
}

#[cfg(not(feature = "redis"))]
fn redis_token_store(_config: &AuthConfig) -> Result<Arc<dyn TokenStore>, StartupError> {
    Err(StartupError::Unsupported(
        "TOKEN_STORE=redis requires the `redis` feature".to_string(),
    ))
}

fn local_limiter(config: &AuthConfig, clock: Arc<dyn Clock>) -> RateLimiter {
    RateLimiter::local(clock)
        .with_rules(config.rate_limits.clone())
        .with_fallback_enabled(config.rate_limit_fallback_enabled)
        .with_timeout(config.store_timeout)
        .with_retry_interval(config.primary_retry_interval)
}

#[cfg(feature = "redis")]
fn rate_limiter(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<RateLimiter, StartupError> {
    let limiter = local_limiter(config, clock);
    match &config.redis_url {
        Some(url) => {
            info!("using redis rate limit store with local fallback");
            let primary = lecture_infra::rate_limit::RedisRateLimitStore::open(url)?;
            Ok(limiter.with_primary(Arc::new(primary)))
        }
        None => {
            warn!("REDIS_URL not set; rate limits are enforced per instance");
            Ok(limiter)
        }
    }
}

#[cfg(not(feature = "redis"))]
fn rate_limiter(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<RateLimiter, StartupError> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL ignored: built without the `redis` feature");
    }
    Ok(local_limiter(config, clock))
}
