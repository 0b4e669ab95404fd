//! Shared helper functions for Rocket route handlers.

use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{Permission, RoleWithPermissions, UserWithRoles};
use crate::seed_data::SUPER_ADMIN_ROLE_NAME;
use crate::store::{RbacStore, dedup_ids};

/// Deduplicate `ids` and confirm every referenced role exists and `caller` may grant it.
///
/// Unknown ids give [`ApiError::BadRequest`]. The Super Admin role can only be granted by
/// a caller who holds it.
pub async fn ensure_grantable_roles(
    store: &dyn RbacStore,
    caller: &AuthUser,
    ids: &[Uuid],
) -> Result<Vec<Uuid>, ApiError> {
    let ids = dedup_ids(ids);
    let found = store.find_roles_by_ids(&ids).await?;
    if found.len() != ids.len() {
        return Err(ApiError::BadRequest(
            "one or more roles do not exist".to_string(),
        ));
    }
    if found.iter().any(|role| role.name == SUPER_ADMIN_ROLE_NAME) {
        caller.require_role(SUPER_ADMIN_ROLE_NAME)?;
    }
    Ok(ids)
}

/// Deduplicate `ids` and confirm every referenced permission exists.
pub async fn ensure_permissions_exist(
    store: &dyn RbacStore,
    ids: &[Uuid],
) -> Result<Vec<Uuid>, ApiError> {
    let ids = dedup_ids(ids);
    let found = store.find_permissions_by_ids(&ids).await?;
    if found.len() != ids.len() {
        return Err(ApiError::BadRequest(
            "one or more permissions do not exist".to_string(),
        ));
    }
    Ok(ids)
}

/// Resolve permission references given either as ids or as `<resource>.<action>` names.
///
/// The list is treated as ids only when every entry parses as a UUID.
pub async fn resolve_permission_refs(
    store: &dyn RbacStore,
    refs: &[String],
) -> Result<Vec<Uuid>, ApiError> {
    let parsed: Option<Vec<Uuid>> = refs.iter().map(|r| r.trim().parse().ok()).collect();
    if let Some(ids) = parsed {
        return ensure_permissions_exist(store, &ids).await;
    }

    let mut names: Vec<String> = refs.iter().map(|r| r.trim().to_string()).collect();
    names.sort();
    names.dedup();
    let found: Vec<Permission> = store.find_permissions_by_names(&names).await?;
    if found.len() != names.len() {
        return Err(ApiError::BadRequest(
            "one or more permissions do not exist".to_string(),
        ));
    }
    Ok(found.into_iter().map(|permission| permission.id).collect())
}

pub async fn load_user(store: &dyn RbacStore, id: Uuid) -> Result<UserWithRoles, ApiError> {
    store
        .load_user_with_roles(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

pub async fn load_role(store: &dyn RbacStore, id: Uuid) -> Result<RoleWithPermissions, ApiError> {
    store
        .find_role(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("role not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, EffectivePermissions};
    use crate::seed_data::seed_defaults;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn permission_refs_accept_names_or_ids() {
        let store = MemoryStore::new();
        seed_defaults(&store).await.expect("seed");

        let by_name = resolve_permission_refs(&store, &["user.read".into(), "role.read".into()])
            .await
            .expect("names resolve");
        assert_eq!(by_name.len(), 2);

        let ids: Vec<String> = by_name.iter().map(|id| id.to_string()).collect();
        let by_id = resolve_permission_refs(&store, &ids).await.expect("ids resolve");
        assert_eq!(by_id, by_name);

        let err = resolve_permission_refs(&store, &["user.read".into(), "nope.none".into()])
            .await
            .expect_err("unknown name");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_role_ids_are_rejected() {
        let store = MemoryStore::new();
        seed_defaults(&store).await.expect("seed");
        let role = store
            .find_role_by_name("Admin")
            .await
            .expect("lookup")
            .expect("role");
        let caller = caller_with_roles(&["Admin"]);

        let ids = ensure_grantable_roles(&store, &caller, &[role.id, role.id])
            .await
            .expect("dedup");
        assert_eq!(ids, vec![role.id]);

        let err = ensure_grantable_roles(&store, &caller, &[role.id, Uuid::new_v4()])
            .await
            .expect_err("unknown");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn only_super_admins_grant_super_admin() {
        let store = MemoryStore::new();
        seed_defaults(&store).await.expect("seed");
        let super_admin = store
            .find_role_by_name(SUPER_ADMIN_ROLE_NAME)
            .await
            .expect("lookup")
            .expect("role");

        let err = ensure_grantable_roles(&store, &caller_with_roles(&["Admin"]), &[super_admin.id])
            .await
            .expect_err("admin cannot escalate");
        assert!(matches!(err, ApiError::Auth(AuthError::MissingRole { .. })));

        let ids = ensure_grantable_roles(
            &store,
            &caller_with_roles(&[SUPER_ADMIN_ROLE_NAME]),
            &[super_admin.id],
        )
        .await
        .expect("super admin may grant");
        assert_eq!(ids, vec![super_admin.id]);
    }

    fn caller_with_roles(roles: &[&str]) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "caller@example.com".into(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
            permissions: EffectivePermissions::default(),
        }
    }
}
