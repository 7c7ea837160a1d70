use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use lecture_core::{GroupId, PrincipalId};

use crate::Role;

/// A fully resolved principal for authorization decisions.
///
/// Resolved externally (user service) and read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    #[serde(default)]
    pub roles: HashSet<Role>,
    /// Group the principal belongs to, if any (used by group-scoped rules).
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl Principal {
    pub fn new(principal_id: impl Into<PrincipalId>) -> Self {
        Self {
            principal_id: principal_id.into(),
            roles: HashSet::new(),
            group_id: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<GroupId>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}
