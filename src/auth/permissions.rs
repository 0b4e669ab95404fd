//! Effective permission aggregation.
//!
//! A user's effective permissions are the union of the names of every active permission
//! reachable through an active role. Inactive roles contribute nothing, whatever their
//! permissions look like.

use std::collections::BTreeSet;

use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::models::{PermissionName, RoleWithPermissions};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeSet<PermissionName>);

impl EffectivePermissions {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn contains_any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.contains(name))
    }

    pub fn contains_all(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.contains(name))
    }

    /// Names from `names` that are not granted, in the order given.
    pub fn missing(&self, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .filter(|name| !self.contains(name))
            .map(|name| name.to_string())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_names(self) -> Vec<String> {
        self.0.into_iter().map(PermissionName::into_inner).collect()
    }
}

impl FromIterator<PermissionName> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = PermissionName>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn effective_permissions(roles: &[RoleWithPermissions]) -> EffectivePermissions {
    roles
        .iter()
        .filter(|role| role.role.is_active)
        .flat_map(|role| role.permissions.iter())
        .filter(|permission| permission.is_active)
        .map(|permission| permission.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{Permission, Role};

    fn permission(name: &str, is_active: bool) -> Permission {
        let name = PermissionName::from(name);
        let now = Utc::now();
        Permission {
            id: Uuid::new_v4(),
            resource: name.resource().unwrap_or_default().to_string(),
            action: name.action().unwrap_or_default().to_string(),
            name,
            description: None,
            is_active,
            created_at: now,
            updated_at: now,
        }
    }

    fn role(name: &str, is_active: bool, permissions: Vec<Permission>) -> RoleWithPermissions {
        let now = Utc::now();
        RoleWithPermissions {
            role: Role {
                id: Uuid::new_v4(),
                name: name.into(),
                description: None,
                is_active,
                created_at: now,
                updated_at: now,
            },
            permissions,
        }
    }

    #[test]
    fn skips_inactive_roles_and_permissions() {
        let roles = vec![
            role(
                "R",
                true,
                vec![permission("user.read", true), permission("user.update", false)],
            ),
            role("S", false, vec![permission("role.read", true)]),
        ];

        let effective = effective_permissions(&roles);
        assert_eq!(effective.len(), 1);
        assert!(effective.contains("user.read"));
        assert!(!effective.contains("user.update"));
        assert!(!effective.contains("role.read"));
    }

    #[test]
    fn duplicates_collapse_across_roles() {
        let roles = vec![
            role("A", true, vec![permission("user.read", true)]),
            role(
                "B",
                true,
                vec![permission("user.read", true), permission("role.read", true)],
            ),
        ];

        let effective = effective_permissions(&roles);
        assert_eq!(effective.into_names(), vec!["role.read", "user.read"]);
    }

    #[test]
    fn any_all_and_missing() {
        let effective: EffectivePermissions =
            ["user.read", "user.create"].into_iter().map(PermissionName::from).collect();

        assert!(effective.contains_any(&["user.delete", "user.read"]));
        assert!(!effective.contains_all(&["user.read", "user.delete"]));
        assert!(effective.contains_all(&["user.read", "user.create"]));
        assert_eq!(
            effective.missing(&["user.read", "user.delete"]),
            vec!["user.delete".to_string()]
        );
        assert!(EffectivePermissions::default().is_empty());
    }
}
