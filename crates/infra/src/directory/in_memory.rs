use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use lecture_auth::Principal;
use lecture_core::PrincipalId;

use super::{CredentialVerifier, DirectoryError, PrincipalResolver};

#[derive(Debug, Clone)]
struct Account {
    principal_id: PrincipalId,
    password_digest: [u8; 32],
}

/// In-process stand-in for the user service (dev and tests).
///
/// Passwords are kept only as SHA-256 digests and compared in constant time.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    principals: RwLock<HashMap<PrincipalId, Principal>>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_principal(&self, principal: Principal) {
        if let Ok(mut principals) = self.principals.write() {
            principals.insert(principal.principal_id.clone(), principal);
        }
    }

    /// Register a principal together with login credentials.
    pub fn add_account(&self, login: impl Into<String>, password: &str, principal: Principal) {
        let account = Account {
            principal_id: principal.principal_id.clone(),
            password_digest: digest(password),
        };
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(login.into(), account);
        }
        self.add_principal(principal);
    }

    pub fn remove_principal(&self, principal_id: &PrincipalId) {
        if let Ok(mut principals) = self.principals.write() {
            principals.remove(principal_id);
        }
    }
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

fn poisoned() -> DirectoryError {
    DirectoryError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl PrincipalResolver for InMemoryUserDirectory {
    async fn resolve(&self, principal_id: &PrincipalId) -> Result<Option<Principal>, DirectoryError> {
        let principals = self.principals.read().map_err(|_| poisoned())?;
        Ok(principals.get(principal_id).cloned())
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryUserDirectory {
    async fn verify(&self, login: &str, password: &str) -> Result<Option<PrincipalId>, DirectoryError> {
        let accounts = self.accounts.read().map_err(|_| poisoned())?;
        let Some(account) = accounts.get(login) else {
            return Ok(None);
        };
        let ok: bool = account.password_digest.ct_eq(&digest(password)).into();
        Ok(ok.then(|| account.principal_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_auth::Role;

    #[tokio::test]
    async fn verifies_credentials() {
        let dir = InMemoryUserDirectory::new();
        dir.add_account("010-1234", "pw", Principal::new("u1").with_role(Role::ADMIN));

        assert_eq!(dir.verify("010-1234", "pw").await.unwrap(), Some(PrincipalId::new("u1")));
        assert_eq!(dir.verify("010-1234", "nope").await.unwrap(), None);
        assert_eq!(dir.verify("unknown", "pw").await.unwrap(), None);

        let principal = dir.resolve(&PrincipalId::new("u1")).await.unwrap().unwrap();
        assert!(principal.has_role(&Role::ADMIN));
    }

    #[tokio::test]
    async fn unknown_principal_resolves_to_none() {
        let dir = InMemoryUserDirectory::new();
        assert_eq!(dir.resolve(&PrincipalId::new("ghost")).await.unwrap(), None);
    }
}
