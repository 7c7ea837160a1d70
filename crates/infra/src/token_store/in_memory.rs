use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use lecture_auth::{Session, TokenId};
use lecture_core::PrincipalId;

use super::{TokenStore, TokenStoreError};

/// In-memory token store.
///
/// Intended for tests/dev and single-instance deployments only: revocations
/// are not visible to other processes.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    sessions: RwLock<HashMap<TokenId, Session>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> TokenStoreError {
    TokenStoreError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, session: &Session) -> Result<(), TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        if map.contains_key(&session.token_id) {
            return Err(TokenStoreError::Duplicate);
        }
        map.insert(session.token_id.clone(), session.clone());
        Ok(())
    }

    async fn insert_exclusive(&self, session: &Session) -> Result<u64, TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        if map.contains_key(&session.token_id) {
            return Err(TokenStoreError::Duplicate);
        }
        let mut revoked = 0;
        for other in map.values_mut() {
            if other.principal_id == session.principal_id && !other.revoked {
                other.revoked = true;
                revoked += 1;
            }
        }
        map.insert(session.token_id.clone(), session.clone());
        Ok(revoked)
    }

    async fn get(&self, token_id: &TokenId) -> Result<Option<Session>, TokenStoreError> {
        let map = self.sessions.read().map_err(|_| poisoned())?;
        Ok(map.get(token_id).cloned())
    }

    async fn revoke(&self, token_id: &TokenId) -> Result<(), TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        if let Some(session) = map.get_mut(token_id) {
            session.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all(&self, principal_id: &PrincipalId) -> Result<u64, TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        let mut changed = 0;
        for session in map.values_mut() {
            if &session.principal_id == principal_id && !session.revoked {
                session.revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn extend(
        &self,
        token_id: &TokenId,
        now: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
        max_lifetime: Duration,
    ) -> Result<Option<Session>, TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        match map.get_mut(token_id) {
            Some(session) if !session.revoked && !session.is_expired(now) => {
                session.expires_at = new_expires_at.min(session.issued_at + max_lifetime);
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, TokenStoreError> {
        let mut map = self.sessions.write().map_err(|_| poisoned())?;
        let before = map.len();
        map.retain(|_, s| !s.is_expired(now));
        Ok((before - map.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_auth::DeviceFingerprint;

    fn session(principal: &str, now: DateTime<Utc>) -> Session {
        Session::new(
            PrincipalId::new(principal),
            DeviceFingerprint::from_raw("fp1"),
            now,
            Duration::minutes(10),
        )
    }

    #[tokio::test]
    async fn insert_get_revoke() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let s = session("u1", now);
        store.insert(&s).await.unwrap();

        assert_eq!(store.get(&s.token_id).await.unwrap(), Some(s.clone()));
        assert_eq!(store.insert(&s).await, Err(TokenStoreError::Duplicate));

        store.revoke(&s.token_id).await.unwrap();
        store.revoke(&s.token_id).await.unwrap();
        assert!(store.get(&s.token_id).await.unwrap().unwrap().revoked);

        // Unknown ids are fine.
        store.revoke(&TokenId::generate()).await.unwrap();
    }

    #[tokio::test]
    async fn extend_only_live_sessions() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let s = session("u1", now);
        store.insert(&s).await.unwrap();

        let later = now + Duration::hours(1);
        let extended = store
            .extend(&s.token_id, now, later, Duration::days(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.expires_at, later);

        // Past expiry: condition fails.
        assert!(store
            .extend(
                &s.token_id,
                later + Duration::seconds(1),
                later + Duration::hours(1),
                Duration::days(1),
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoke_all_and_purge() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let a = session("u1", now);
        let b = session("u1", now);
        let c = session("u2", now);
        for s in [&a, &b, &c] {
            store.insert(s).await.unwrap();
        }

        assert_eq!(store.revoke_all(&PrincipalId::new("u1")).await.unwrap(), 2);
        assert_eq!(store.revoke_all(&PrincipalId::new("u1")).await.unwrap(), 0);
        assert!(!store.get(&c.token_id).await.unwrap().unwrap().revoked);

        assert_eq!(store.purge_expired(now + Duration::minutes(11)).await.unwrap(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn extend_never_passes_the_lifetime_cap() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let s = session("u1", now);
        store.insert(&s).await.unwrap();

        let extended = store
            .extend(&s.token_id, now, now + Duration::hours(1), Duration::minutes(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extended.expires_at, s.issued_at + Duration::minutes(30));
    }

    #[tokio::test]
    async fn insert_exclusive_replaces_live_sessions() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let a = session("u1", now);
        let b = session("u1", now);
        let other = session("u2", now);
        store.insert(&a).await.unwrap();
        store.insert(&other).await.unwrap();

        assert_eq!(store.insert_exclusive(&b).await.unwrap(), 1);
        assert!(store.get(&a.token_id).await.unwrap().unwrap().revoked);
        assert!(!store.get(&b.token_id).await.unwrap().unwrap().revoked);
        assert!(!store.get(&other.token_id).await.unwrap().unwrap().revoked);

        // A duplicate id changes nothing.
        assert_eq!(store.insert_exclusive(&b).await, Err(TokenStoreError::Duplicate));
        assert!(!store.get(&b.token_id).await.unwrap().unwrap().revoked);
    }
}
