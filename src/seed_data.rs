//! Default permissions and roles installed by `rbac-admin seed` and on server start.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{NewPermission, NewRole, PermissionName};
use crate::store::{RbacStore, StoreResult};

/// Role assigned to self-registered accounts.
pub const DEFAULT_ROLE_NAME: &str = "User";

/// Holds every permission. Only its members may grant it.
pub const SUPER_ADMIN_ROLE_NAME: &str = "Super Admin";

/// Roles that cannot be deleted.
pub const SYSTEM_ROLE_NAMES: [&str; 4] = [SUPER_ADMIN_ROLE_NAME, "Admin", "Manager", DEFAULT_ROLE_NAME];

#[derive(Debug, Clone, Copy)]
pub struct PermissionSeed {
    pub resource: &'static str,
    pub action: &'static str,
    pub description: &'static str,
}

impl PermissionSeed {
    pub fn name(&self) -> PermissionName {
        PermissionName::from_parts(self.resource, self.action)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: &'static [&'static str],
}

const fn permission(
    resource: &'static str,
    action: &'static str,
    description: &'static str,
) -> PermissionSeed {
    PermissionSeed {
        resource,
        action,
        description,
    }
}

pub const DEFAULT_PERMISSIONS: [PermissionSeed; 16] = [
    permission("user", "read", "Read user accounts"),
    permission("user", "create", "Create user accounts"),
    permission("user", "update", "Update user accounts"),
    permission("user", "delete", "Delete user accounts"),
    permission("role", "read", "Read roles"),
    permission("role", "create", "Create roles"),
    permission("role", "update", "Update roles"),
    permission("role", "delete", "Delete roles"),
    permission("permission", "read", "Read permissions"),
    permission("permission", "create", "Create permissions"),
    permission("permission", "update", "Update permissions"),
    permission("permission", "delete", "Delete permissions"),
    permission("system", "admin", "Full administrative access"),
    permission("dashboard", "access", "Access the dashboard"),
    permission("reports", "view", "View system reports"),
    permission("audit", "view", "View audit logs"),
];

pub const DEFAULT_ROLES: [RoleSeed; 4] = [
    RoleSeed {
        name: SUPER_ADMIN_ROLE_NAME,
        description: "Full access to every feature",
        permissions: &[
            "user.read",
            "user.create",
            "user.update",
            "user.delete",
            "role.read",
            "role.create",
            "role.update",
            "role.delete",
            "permission.read",
            "permission.create",
            "permission.update",
            "permission.delete",
            "system.admin",
            "dashboard.access",
            "reports.view",
            "audit.view",
        ],
    },
    RoleSeed {
        name: "Admin",
        description: "User administration without role or permission management",
        permissions: &[
            "user.read",
            "user.create",
            "user.update",
            "user.delete",
            "role.read",
            "permission.read",
            "dashboard.access",
            "reports.view",
        ],
    },
    RoleSeed {
        name: "Manager",
        description: "Read access with limited user updates",
        permissions: &[
            "user.read",
            "user.update",
            "role.read",
            "permission.read",
            "dashboard.access",
        ],
    },
    RoleSeed {
        name: DEFAULT_ROLE_NAME,
        description: "Standard account with basic access",
        permissions: &["dashboard.access"],
    },
];

pub fn is_system_role(name: &str) -> bool {
    SYSTEM_ROLE_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
}

/// Install missing default permissions and roles. Existing rows are left untouched, so
/// running this repeatedly is safe.
pub async fn seed_defaults(store: &dyn RbacStore) -> StoreResult<SeedReport> {
    let mut report = SeedReport::default();

    let names: Vec<String> = DEFAULT_PERMISSIONS
        .iter()
        .map(|seed| seed.name().into_inner())
        .collect();
    let mut ids: HashMap<String, Uuid> = store
        .find_permissions_by_names(&names)
        .await?
        .into_iter()
        .map(|permission| (permission.name.into_inner(), permission.id))
        .collect();

    for seed in DEFAULT_PERMISSIONS.iter() {
        let name = seed.name();
        if ids.contains_key(name.as_str()) {
            continue;
        }
        let created = store
            .create_permission(NewPermission {
                name: name.clone(),
                resource: seed.resource.to_string(),
                action: seed.action.to_string(),
                description: Some(seed.description.to_string()),
                is_active: true,
            })
            .await?;
        ids.insert(name.into_inner(), created.id);
        report.permissions_created += 1;
    }

    for seed in DEFAULT_ROLES.iter() {
        if store.find_role_by_name(seed.name).await?.is_some() {
            continue;
        }
        let permission_ids = seed
            .permissions
            .iter()
            .filter_map(|name| ids.get(*name).copied())
            .collect();
        store
            .create_role(NewRole {
                name: seed.name.to_string(),
                description: Some(seed.description.to_string()),
                permission_ids,
                is_active: true,
            })
            .await?;
        report.roles_created += 1;
    }

    if report != SeedReport::default() {
        log::info!(
            "seeded {} permission(s) and {} role(s)",
            report.permissions_created,
            report.roles_created
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        let first = seed_defaults(&store).await.expect("first seed");
        assert_eq!(first.permissions_created, 16);
        assert_eq!(first.roles_created, 4);

        let second = seed_defaults(&store).await.expect("second seed");
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn default_role_grants_dashboard_access() {
        let store = MemoryStore::new();
        seed_defaults(&store).await.expect("seed");

        let role = store
            .find_role_by_name(DEFAULT_ROLE_NAME)
            .await
            .expect("lookup")
            .expect("default role");
        let role = store.find_role(role.id).await.expect("lookup").expect("role");
        let names: Vec<_> = role.permissions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["dashboard.access"]);
    }

    #[test]
    fn role_seeds_reference_known_permissions() {
        let known: Vec<String> = DEFAULT_PERMISSIONS
            .iter()
            .map(|seed| seed.name().into_inner())
            .collect();
        for role in DEFAULT_ROLES.iter() {
            for name in role.permissions {
                assert!(known.iter().any(|k| k == name), "{name} is not seeded");
            }
            assert!(is_system_role(role.name));
        }
    }
}
