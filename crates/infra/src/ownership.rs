//! Ownership lookup: resolves who owns a resource for the Authorization
//! Engine. One `OwnershipLookup` is registered per resource type.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use lecture_auth::{OwnerId, ResourceType};
use lecture_core::ResourceId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no ownership lookup registered for {0}")]
    Unregistered(ResourceType),

    #[error("ownership lookup failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait OwnershipLookup: Send + Sync {
    /// Owner of `resource_id`, or `None` if the resource does not exist.
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<Option<OwnerId>, LookupError>;
}

#[async_trait]
impl<S> OwnershipLookup for Arc<S>
where
    S: OwnershipLookup + ?Sized,
{
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<Option<OwnerId>, LookupError> {
        (**self).resolve_owner(resource_type, resource_id).await
    }
}

/// Dispatches to the lookup registered for each resource type.
#[derive(Clone, Default)]
pub struct OwnershipRegistry {
    lookups: HashMap<ResourceType, Arc<dyn OwnershipLookup>>,
}

impl core::fmt::Debug for OwnershipRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OwnershipRegistry")
            .field("resource_types", &self.lookups.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource_type: ResourceType, lookup: Arc<dyn OwnershipLookup>) -> Self {
        self.lookups.insert(resource_type, lookup);
        self
    }
}

#[async_trait]
impl OwnershipLookup for OwnershipRegistry {
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<Option<OwnerId>, LookupError> {
        let lookup = self
            .lookups
            .get(&resource_type)
            .ok_or(LookupError::Unregistered(resource_type))?;
        lookup.resolve_owner(resource_type, resource_id).await
    }
}

/// Map-backed ownership records (dev/test, demo routes).
#[derive(Debug, Default)]
pub struct InMemoryOwnership {
    owners: RwLock<HashMap<(ResourceType, ResourceId), OwnerId>>,
}

impl InMemoryOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_type: ResourceType, resource_id: impl Into<ResourceId>, owner: impl Into<String>) {
        if let Ok(mut owners) = self.owners.write() {
            owners.insert((resource_type, resource_id.into()), OwnerId::new(owner));
        }
    }
}

#[async_trait]
impl OwnershipLookup for InMemoryOwnership {
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<Option<OwnerId>, LookupError> {
        let owners = self
            .owners
            .read()
            .map_err(|_| LookupError::Backend("lock poisoned".to_string()))?;
        Ok(owners.get(&(resource_type, resource_id.clone())).cloned())
    }
}
