//! Declarative ownership policy.
//!
//! A `PolicyRule` is static metadata attached to a protected operation when
//! the route/operation is wired. It names the resource type, the action, which
//! operation argument carries the resource id, and which roles skip the
//! ownership check.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use lecture_core::ResourceId;

use crate::Role;

/// Resource types protected by ownership rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Group,
    Lecture,
    User,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Group => "group",
            ResourceType::Lecture => "lecture",
            ResourceType::User => "user",
        }
    }
}

impl core::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Update,
    Delete,
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the resolved owner is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipCheck {
    /// Owner must be the principal itself (lectures, user records).
    #[default]
    Principal,
    /// Owner must be the principal's group (group records).
    Group,
}

/// Owning identity returned by an ownership lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub resource_type: ResourceType,
    pub action: Action,
    /// Name of the operation argument carrying the resource id.
    pub owner_param: &'static str,
    pub bypass_roles: HashSet<Role>,
    pub ownership: OwnershipCheck,
}

impl PolicyRule {
    pub fn new(resource_type: ResourceType, action: Action, owner_param: &'static str) -> Self {
        Self {
            resource_type,
            action,
            owner_param,
            bypass_roles: HashSet::new(),
            ownership: OwnershipCheck::Principal,
        }
    }

    pub fn bypass(mut self, role: Role) -> Self {
        self.bypass_roles.insert(role);
        self
    }

    pub fn group_scoped(mut self) -> Self {
        self.ownership = OwnershipCheck::Group;
        self
    }

    /// "Only members of this group (or admins)".
    pub fn group(action: Action) -> Self {
        Self::new(ResourceType::Group, action, "group_id")
            .group_scoped()
            .bypass(Role::ADMIN)
    }

    /// "Only the lecture's creator (or admins)".
    pub fn lecture(action: Action) -> Self {
        Self::new(ResourceType::Lecture, action, "lecture_id").bypass(Role::ADMIN)
    }

    /// "Only the user themselves (or admins)".
    pub fn user(action: Action) -> Self {
        Self::new(ResourceType::User, action, "user_id").bypass(Role::ADMIN)
    }
}

/// Named arguments of an intercepted operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationArgs(HashMap<String, String>);

impl OperationArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Resource id named by the rule, if present and well-formed.
    pub fn resource_id(&self, rule: &PolicyRule) -> Option<ResourceId> {
        self.get(rule.owner_param)?.parse().ok()
    }
}

impl From<HashMap<String, String>> for OperationArgs {
    fn from(value: HashMap<String, String>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_rules() {
        let rule = PolicyRule::group(Action::Update);
        assert_eq!(rule.owner_param, "group_id");
        assert_eq!(rule.ownership, OwnershipCheck::Group);
        assert!(rule.bypass_roles.contains(&Role::ADMIN));

        let rule = PolicyRule::lecture(Action::Delete);
        assert_eq!(rule.ownership, OwnershipCheck::Principal);
    }

    #[test]
    fn resource_id_extraction() {
        let rule = PolicyRule::lecture(Action::Update);
        let args = OperationArgs::new().with("lecture_id", " 42 ");
        assert_eq!(args.resource_id(&rule), Some(ResourceId::new("42")));

        let wrong = OperationArgs::new().with("group_id", "42");
        assert_eq!(wrong.resource_id(&rule), None);

        let blank = OperationArgs::new().with("lecture_id", "");
        assert_eq!(blank.resource_id(&rule), None);
    }
}
