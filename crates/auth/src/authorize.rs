use serde::Serialize;

use crate::{AuthError, OwnerId, OwnershipCheck, PolicyRule, Principal, Role};

/// Why access was admitted (kept for audit logging).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AccessGrant {
    /// Administrative override via a bypass role.
    Bypass { role: Role },
    /// Principal (or its group) owns the resource.
    Owner,
}

/// Bypass role held by the principal, if any.
///
/// - No IO
/// - No panics
pub fn check_bypass(principal: &Principal, rule: &PolicyRule) -> Option<Role> {
    rule.bypass_roles
        .iter()
        .find(|role| principal.has_role(role))
        .cloned()
}

/// Compare a resolved owner against the principal (pure policy check).
///
/// `owner == None` means the resource does not exist.
pub fn check_ownership(
    principal: &Principal,
    rule: &PolicyRule,
    owner: Option<&OwnerId>,
) -> Result<AccessGrant, AuthError> {
    let owner = owner.ok_or(AuthError::NotFound)?;

    let owns = match rule.ownership {
        OwnershipCheck::Principal => owner.as_str() == principal.principal_id.as_str(),
        OwnershipCheck::Group => principal
            .group_id
            .as_ref()
            .is_some_and(|g| g.as_str() == owner.as_str()),
    };

    if owns {
        Ok(AccessGrant::Owner)
    } else {
        Err(AuthError::Forbidden)
    }
}
