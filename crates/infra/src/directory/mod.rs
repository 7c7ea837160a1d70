//! Collaborators backed by the external user service: principal (role and
//! group) resolution and credential verification.
//!
//! The auth core never stores passwords; `CredentialVerifier` delegates the
//! check and only learns the principal id on success.

pub mod http;
pub mod in_memory;
pub mod resilient;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use lecture_auth::Principal;
use lecture_core::PrincipalId;

pub use http::HttpUserDirectory;
pub use in_memory::InMemoryUserDirectory;
pub use resilient::{ResilienceConfig, ResilientResolver};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user service unavailable: {0}")]
    Unavailable(String),

    #[error("user service returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Roles and group of a principal, or `None` if the user no longer exists.
    async fn resolve(&self, principal_id: &PrincipalId) -> Result<Option<Principal>, DirectoryError>;
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError>;
}

#[async_trait]
impl<S> PrincipalResolver for Arc<S>
where
    S: PrincipalResolver + ?Sized,
{
    async fn resolve(&self, principal_id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        (**self).resolve(principal_id).await
    }
}

#[async_trait]
impl<S> CredentialVerifier for Arc<S>
where
    S: CredentialVerifier + ?Sized,
{
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError> {
        (**self).verify(login, password).await
    }
}
