//! In-process lecture and group records backing the demo routes, and the
//! ownership lookups derived from them:
//! - lecture: owned by its creator
//! - group: owned by the group itself (compared to the principal's group)
//! - user: a user owns their own record, if the user is known here

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use lecture_auth::{OwnerId, ResourceType};
use lecture_core::ResourceId;
use lecture_infra::ownership::{LookupError, OwnershipLookup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureRecord {
    pub id: String,
    pub title: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct Catalog {
    lectures: RwLock<HashMap<String, LectureRecord>>,
    groups: RwLock<HashMap<String, GroupRecord>>,
    users: RwLock<HashSet<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_lecture(&self, record: LectureRecord) {
        if let Ok(mut lectures) = self.lectures.write() {
            lectures.insert(record.id.clone(), record);
        }
    }

    pub fn insert_group(&self, record: GroupRecord) {
        if let Ok(mut groups) = self.groups.write() {
            groups.insert(record.id.clone(), record);
        }
    }

    pub fn insert_user(&self, id: impl Into<String>) {
        if let Ok(mut users) = self.users.write() {
            users.insert(id.into());
        }
    }

    pub fn has_user(&self, id: &str) -> bool {
        self.users.read().map(|u| u.contains(id)).unwrap_or(false)
    }

    pub fn lecture(&self, id: &str) -> Option<LectureRecord> {
        self.lectures.read().ok()?.get(id).cloned()
    }

    pub fn group(&self, id: &str) -> Option<GroupRecord> {
        self.groups.read().ok()?.get(id).cloned()
    }

    pub fn rename_lecture(&self, id: &str, title: String) -> Option<LectureRecord> {
        let mut lectures = self.lectures.write().ok()?;
        let record = lectures.get_mut(id)?;
        record.title = title;
        Some(record.clone())
    }

    pub fn remove_lecture(&self, id: &str) -> Option<LectureRecord> {
        self.lectures.write().ok()?.remove(id)
    }

    pub fn lectures_owned_by(&self, owner_id: &str) -> Vec<LectureRecord> {
        let Ok(lectures) = self.lectures.read() else {
            return Vec::new();
        };
        let mut owned: Vec<LectureRecord> = lectures
            .values()
            .filter(|l| l.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        owned
    }
}

#[async_trait]
impl OwnershipLookup for Catalog {
    async fn resolve_owner(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<Option<OwnerId>, LookupError> {
        let id = resource_id.as_str();
        let owner = match resource_type {
            ResourceType::Lecture => self.lecture(id).map(|l| OwnerId::new(l.owner_id)),
            ResourceType::Group => self.group(id).map(|g| OwnerId::new(g.id)),
            ResourceType::User => self.has_user(id).then(|| OwnerId::new(id)),
        };
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn owners_per_resource_type() {
        let catalog = Catalog::new();
        catalog.insert_lecture(LectureRecord {
            id: "42".into(),
            title: "Rust".into(),
            owner_id: "A".into(),
        });
        catalog.insert_group(GroupRecord {
            id: "g1".into(),
            name: "Backend".into(),
        });

        let catalog = &catalog;
        let owner = |t: ResourceType, id: &str| {
            let id = ResourceId::new(id);
            async move { catalog.resolve_owner(t, &id).await }
        };
        assert_eq!(owner(ResourceType::Lecture, "42").await.unwrap(), Some(OwnerId::new("A")));
        assert_eq!(owner(ResourceType::Lecture, "43").await.unwrap(), None);
        assert_eq!(owner(ResourceType::Group, "g1").await.unwrap(), Some(OwnerId::new("g1")));
        assert_eq!(owner(ResourceType::User, "u1").await.unwrap(), None);

        catalog.insert_user("u1");
        assert_eq!(owner(ResourceType::User, "u1").await.unwrap(), Some(OwnerId::new("u1")));
    }
}
