//! In-memory [`RbacStore`] guarded by a single `parking_lot::RwLock`.
//!
//! Each trait method takes the lock once, so every mutation is one critical section.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::lockout::LockoutState;
use crate::auth::passwords::HashedPassword;
use crate::models::{
    NewPermission, NewRole, NewUser, Page, Permission, PermissionChanges, Role, RoleChanges,
    RoleWithPermissions, StoredCode, User, UserChanges, UserRecord, UserWithRoles,
};
use crate::store::{
    PermissionQuery, PermissionSortField, RbacStore, RoleQuery, RoleSortField, SortOrder,
    StoreError, StoreResult, UserQuery, UserSortField, dedup_ids,
};

#[derive(Debug, Clone)]
struct UserRow {
    user: User,
    password_hash: HashedPassword,
    lockout: LockoutState,
    role_ids: Vec<Uuid>,
    verification_code: Option<StoredCode>,
    reset_code: Option<StoredCode>,
}

impl UserRow {
    fn record(&self) -> UserRecord {
        UserRecord {
            user: self.user.clone(),
            password_hash: self.password_hash.clone(),
            lockout: self.lockout,
            role_ids: self.role_ids.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct RoleRow {
    role: Role,
    permission_ids: Vec<Uuid>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<Uuid, UserRow>,
    roles: HashMap<Uuid, RoleRow>,
    permissions: HashMap<Uuid, Permission>,
}

impl Inner {
    fn resolve_role(&self, row: &RoleRow) -> RoleWithPermissions {
        RoleWithPermissions {
            role: row.role.clone(),
            permissions: row
                .permission_ids
                .iter()
                .filter_map(|id| self.permissions.get(id).cloned())
                .collect(),
        }
    }

    fn resolve_user(&self, row: &UserRow) -> UserWithRoles {
        let mut roles: Vec<RoleWithPermissions> = row
            .role_ids
            .iter()
            .filter_map(|id| self.roles.get(id))
            .map(|role| self.resolve_role(role))
            .collect();
        roles.sort_by(|a, b| a.role.name.cmp(&b.role.name));
        UserWithRoles {
            user: row.user.clone(),
            roles,
        }
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|row| Some(row.user.id) != except && row.user.email.eq_ignore_ascii_case(email))
    }

    fn role_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.roles
            .values()
            .any(|row| Some(row.role.id) != except && row.role.name == name)
    }

    fn permission_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.permissions
            .values()
            .any(|permission| Some(permission.id) != except && permission.name.as_str() == name)
    }

    fn user_mut(&mut self, id: Uuid) -> StoreResult<&mut UserRow> {
        self.users.get_mut(&id).ok_or(StoreError::NotFound("user"))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored verification code digest for a user. Used by tests that need to
    /// observe what the flow persisted.
    pub fn verification_code_for(&self, id: Uuid) -> Option<StoredCode> {
        self.inner
            .read()
            .users
            .get(&id)
            .and_then(|row| row.verification_code.clone())
    }

    pub fn reset_code_for(&self, id: Uuid) -> Option<StoredCode> {
        self.inner
            .read()
            .users
            .get(&id)
            .and_then(|row| row.reset_code.clone())
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn paginate<T>(items: Vec<T>, page: i64, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let items = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    Page {
        items,
        total,
        page,
        limit,
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

#[rocket::async_trait]
impl RbacStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .users
            .values()
            .find(|row| row.user.email.eq_ignore_ascii_case(email))
            .map(UserRow::record))
    }

    async fn find_user_record(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        Ok(self.inner.read().users.get(&id).map(UserRow::record))
    }

    async fn load_user_with_roles(&self, id: Uuid) -> StoreResult<Option<UserWithRoles>> {
        let inner = self.inner.read();
        Ok(inner.users.get(&id).map(|row| inner.resolve_user(row)))
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<UserWithRoles>> {
        let inner = self.inner.read();
        let role_id = match &query.role {
            Some(name) => match inner.roles.values().find(|row| &row.role.name == name) {
                Some(row) => Some(row.role.id),
                None => return Ok(paginate(Vec::new(), query.page, query.limit, 0)),
            },
            None => None,
        };

        let mut rows: Vec<&UserRow> = inner
            .users
            .values()
            .filter(|row| {
                query.search.as_deref().is_none_or(|term| {
                    contains_ci(&row.user.first_name, term)
                        || contains_ci(&row.user.last_name, term)
                        || contains_ci(&row.user.email, term)
                })
            })
            .filter(|row| query.is_active.is_none_or(|active| row.user.is_active == active))
            .filter(|row| role_id.is_none_or(|id| row.role_ids.contains(&id)))
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match query.sort_by {
                UserSortField::FirstName => a.user.first_name.cmp(&b.user.first_name),
                UserSortField::LastName => a.user.last_name.cmp(&b.user.last_name),
                UserSortField::Email => a.user.email.cmp(&b.user.email),
                UserSortField::CreatedAt => a.user.created_at.cmp(&b.user.created_at),
            };
            directed(ordering.then_with(|| a.user.id.cmp(&b.user.id)), query.sort_order)
        });

        let users = rows.into_iter().map(|row| inner.resolve_user(row)).collect();
        Ok(paginate(users, query.page, query.limit, query.offset()))
    }

    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write();
        if inner.email_taken(&new_user.email, None) {
            return Err(StoreError::Conflict {
                entity: "user",
                value: new_user.email,
            });
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            is_active: new_user.is_active,
            email_verified: new_user.email_verified,
            last_login: None,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(
            user.id,
            UserRow {
                user: user.clone(),
                password_hash: new_user.password_hash,
                lockout: LockoutState::cleared(),
                role_ids: dedup_ids(&new_user.role_ids),
                verification_code: new_user.verification_code,
                reset_code: None,
            },
        );
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        let mut inner = self.inner.write();
        let row = inner.user_mut(id)?;
        if let Some(first_name) = changes.first_name {
            row.user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            row.user.last_name = last_name;
        }
        if let Some(is_active) = changes.is_active {
            row.user.is_active = is_active;
        }
        if let Some(role_ids) = changes.role_ids {
            row.role_ids = dedup_ids(&role_ids);
        }
        row.user.updated_at = Utc::now();
        Ok(row.user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        self.inner
            .write()
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("user"))
    }

    async fn record_login_failure(&self, id: Uuid, state: LockoutState) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner.user_mut(id)?;
        row.lockout = state;
        Ok(())
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner.user_mut(id)?;
        row.lockout = LockoutState::cleared();
        row.user.last_login = Some(now);
        Ok(())
    }

    async fn set_password(&self, id: Uuid, password_hash: &HashedPassword) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let row = inner.user_mut(id)?;
        row.password_hash = password_hash.clone();
        row.user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_verification_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.user_mut(id)?.verification_code = Some(code.clone());
        Ok(())
    }

    async fn set_reset_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.user_mut(id)?.reset_code = Some(code.clone());
        Ok(())
    }

    async fn consume_verification_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut inner = self.inner.write();
        let row = inner.users.values_mut().find(|row| {
            matches!(&row.verification_code, Some(code) if code.digest == digest && code.expires_at > now)
        });
        Ok(row.map(|row| {
            row.verification_code = None;
            row.user.email_verified = true;
            row.user.updated_at = now;
            row.user.clone()
        }))
    }

    async fn consume_reset_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
        password_hash: &HashedPassword,
    ) -> StoreResult<Option<User>> {
        let mut inner = self.inner.write();
        let row = inner.users.values_mut().find(|row| {
            matches!(&row.reset_code, Some(code) if code.digest == digest && code.expires_at > now)
        });
        Ok(row.map(|row| {
            row.reset_code = None;
            row.password_hash = password_hash.clone();
            row.user.updated_at = now;
            row.user.clone()
        }))
    }

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Page<RoleWithPermissions>> {
        let inner = self.inner.read();
        let mut rows: Vec<&RoleRow> = inner
            .roles
            .values()
            .filter(|row| {
                query.search.as_deref().is_none_or(|term| {
                    contains_ci(&row.role.name, term)
                        || row
                            .role
                            .description
                            .as_deref()
                            .is_some_and(|description| contains_ci(description, term))
                })
            })
            .filter(|row| query.is_active.is_none_or(|active| row.role.is_active == active))
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match query.sort_by {
                RoleSortField::Name => a.role.name.cmp(&b.role.name),
                RoleSortField::CreatedAt => a.role.created_at.cmp(&b.role.created_at),
            };
            directed(ordering.then_with(|| a.role.id.cmp(&b.role.id)), query.sort_order)
        });

        let roles = rows.into_iter().map(|row| inner.resolve_role(row)).collect();
        Ok(paginate(roles, query.page, query.limit, query.offset()))
    }

    async fn find_role(&self, id: Uuid) -> StoreResult<Option<RoleWithPermissions>> {
        let inner = self.inner.read();
        Ok(inner.roles.get(&id).map(|row| inner.resolve_role(row)))
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .inner
            .read()
            .roles
            .values()
            .find(|row| row.role.name == name)
            .map(|row| row.role.clone()))
    }

    async fn find_roles_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Role>> {
        let inner = self.inner.read();
        Ok(dedup_ids(ids)
            .iter()
            .filter_map(|id| inner.roles.get(id).map(|row| row.role.clone()))
            .collect())
    }

    async fn create_role(&self, new_role: NewRole) -> StoreResult<RoleWithPermissions> {
        let mut inner = self.inner.write();
        if inner.role_name_taken(&new_role.name, None) {
            return Err(StoreError::Conflict {
                entity: "role",
                value: new_role.name,
            });
        }

        let now = Utc::now();
        let row = RoleRow {
            role: Role {
                id: Uuid::new_v4(),
                name: new_role.name,
                description: new_role.description,
                is_active: new_role.is_active,
                created_at: now,
                updated_at: now,
            },
            permission_ids: dedup_ids(&new_role.permission_ids),
        };
        let resolved = inner.resolve_role(&row);
        inner.roles.insert(row.role.id, row);
        Ok(resolved)
    }

    async fn update_role(
        &self,
        id: Uuid,
        changes: RoleChanges,
    ) -> StoreResult<RoleWithPermissions> {
        let mut inner = self.inner.write();
        if let Some(name) = &changes.name {
            if inner.role_name_taken(name, Some(id)) {
                return Err(StoreError::Conflict {
                    entity: "role",
                    value: name.clone(),
                });
            }
        }

        let row = inner.roles.get_mut(&id).ok_or(StoreError::NotFound("role"))?;
        if let Some(name) = changes.name {
            row.role.name = name;
        }
        if let Some(description) = changes.description {
            row.role.description = Some(description);
        }
        if let Some(is_active) = changes.is_active {
            row.role.is_active = is_active;
        }
        if let Some(permission_ids) = changes.permission_ids {
            row.permission_ids = dedup_ids(&permission_ids);
        }
        row.role.updated_at = Utc::now();

        let row = row.clone();
        Ok(inner.resolve_role(&row))
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.roles.remove(&id).ok_or(StoreError::NotFound("role"))?;
        for row in inner.users.values_mut() {
            row.role_ids.retain(|role_id| *role_id != id);
        }
        Ok(())
    }

    async fn list_permissions(&self, query: &PermissionQuery) -> StoreResult<Page<Permission>> {
        let inner = self.inner.read();
        let mut permissions: Vec<Permission> = inner
            .permissions
            .values()
            .filter(|p| {
                query.search.as_deref().is_none_or(|term| {
                    contains_ci(p.name.as_str(), term)
                        || contains_ci(&p.resource, term)
                        || contains_ci(&p.action, term)
                        || p.description
                            .as_deref()
                            .is_some_and(|description| contains_ci(description, term))
                })
            })
            .filter(|p| {
                query
                    .resource
                    .as_deref()
                    .is_none_or(|resource| contains_ci(&p.resource, resource))
            })
            .filter(|p| {
                query
                    .action
                    .as_deref()
                    .is_none_or(|action| contains_ci(&p.action, action))
            })
            .filter(|p| query.is_active.is_none_or(|active| p.is_active == active))
            .cloned()
            .collect();

        permissions.sort_by(|a, b| {
            let ordering = match query.sort_by {
                PermissionSortField::Name => a.name.cmp(&b.name),
                PermissionSortField::Resource => a.resource.cmp(&b.resource),
                PermissionSortField::Action => a.action.cmp(&b.action),
                PermissionSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            directed(ordering.then_with(|| a.id.cmp(&b.id)), query.sort_order)
        });

        Ok(paginate(
            permissions,
            query.page,
            query.limit,
            query.offset(),
        ))
    }

    async fn find_permission(&self, id: Uuid) -> StoreResult<Option<Permission>> {
        Ok(self.inner.read().permissions.get(&id).cloned())
    }

    async fn find_permissions_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read();
        Ok(dedup_ids(ids)
            .iter()
            .filter_map(|id| inner.permissions.get(id).cloned())
            .collect())
    }

    async fn find_permissions_by_names(&self, names: &[String]) -> StoreResult<Vec<Permission>> {
        let inner = self.inner.read();
        let mut found: Vec<Permission> = inner
            .permissions
            .values()
            .filter(|p| names.iter().any(|name| name == p.name.as_str()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn create_permission(&self, new_permission: NewPermission) -> StoreResult<Permission> {
        let mut inner = self.inner.write();
        if inner.permission_name_taken(new_permission.name.as_str(), None) {
            return Err(StoreError::Conflict {
                entity: "permission",
                value: new_permission.name.into_inner(),
            });
        }

        let now = Utc::now();
        let permission = Permission {
            id: Uuid::new_v4(),
            name: new_permission.name,
            resource: new_permission.resource,
            action: new_permission.action,
            description: new_permission.description,
            is_active: new_permission.is_active,
            created_at: now,
            updated_at: now,
        };
        inner.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn update_permission(
        &self,
        id: Uuid,
        changes: PermissionChanges,
    ) -> StoreResult<Permission> {
        let mut inner = self.inner.write();
        if let Some(name) = &changes.name {
            if inner.permission_name_taken(name.as_str(), Some(id)) {
                return Err(StoreError::Conflict {
                    entity: "permission",
                    value: name.to_string(),
                });
            }
        }

        let permission = inner
            .permissions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("permission"))?;
        if let Some(name) = changes.name {
            permission.name = name;
        }
        if let Some(resource) = changes.resource {
            permission.resource = resource;
        }
        if let Some(action) = changes.action {
            permission.action = action;
        }
        if let Some(description) = changes.description {
            permission.description = Some(description);
        }
        if let Some(is_active) = changes.is_active {
            permission.is_active = is_active;
        }
        permission.updated_at = Utc::now();
        Ok(permission.clone())
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner
            .permissions
            .remove(&id)
            .ok_or(StoreError::NotFound("permission"))?;
        for row in inner.roles.values_mut() {
            row.permission_ids.retain(|permission_id| *permission_id != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::auth::passwords::PasswordService;
    use crate::models::PermissionName;

    fn hash() -> HashedPassword {
        PasswordService::with_params(1024, 1, 1)
            .expect("password service")
            .hash_password("Abc12345!")
            .expect("hash")
    }

    fn new_user(email: &str, role_ids: Vec<Uuid>) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: hash(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role_ids,
            is_active: true,
            email_verified: false,
            verification_code: None,
        }
    }

    fn new_permission(name: &str) -> NewPermission {
        let name = PermissionName::from(name);
        NewPermission {
            resource: name.resource().unwrap_or_default().into(),
            action: name.action().unwrap_or_default().into(),
            name,
            description: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::new();
        store
            .create_user(new_user("a@x.com", vec![]))
            .await
            .expect("first insert");
        let err = store
            .create_user(new_user("A@X.com", vec![]))
            .await
            .expect_err("duplicate rejected");
        assert!(matches!(err, StoreError::Conflict { entity: "user", .. }));
    }

    #[tokio::test]
    async fn aggregate_resolves_roles_and_permissions() {
        let store = MemoryStore::new();
        let read = store
            .create_permission(new_permission("user.read"))
            .await
            .expect("permission");
        let role = store
            .create_role(NewRole {
                name: "Reader".into(),
                description: None,
                permission_ids: vec![read.id],
                is_active: true,
            })
            .await
            .expect("role");
        let user = store
            .create_user(new_user("a@x.com", vec![role.role.id]))
            .await
            .expect("user");

        let aggregate = store
            .load_user_with_roles(user.id)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(aggregate.role_names(), vec!["Reader"]);
        assert!(aggregate.effective_permissions().contains("user.read"));

        store.delete_permission(read.id).await.expect("delete");
        let aggregate = store
            .load_user_with_roles(user.id)
            .await
            .expect("load")
            .expect("present");
        assert!(aggregate.roles[0].permissions.is_empty());
    }

    #[tokio::test]
    async fn codes_are_consumed_once_and_expire() {
        let store = MemoryStore::new();
        let user = store
            .create_user(new_user("a@x.com", vec![]))
            .await
            .expect("user");
        let now = Utc::now();
        let code = StoredCode {
            digest: "abc".into(),
            expires_at: now + Duration::minutes(15),
        };
        store
            .set_verification_code(user.id, &code)
            .await
            .expect("set code");

        let expired = store
            .consume_verification_code("abc", now + Duration::minutes(16))
            .await
            .expect("consume");
        assert!(expired.is_none());

        let verified = store
            .consume_verification_code("abc", now)
            .await
            .expect("consume")
            .expect("matched");
        assert!(verified.email_verified);
        assert!(
            store
                .consume_verification_code("abc", now)
                .await
                .expect("consume")
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_users_filters_by_role_and_search() {
        let store = MemoryStore::new();
        let role = store
            .create_role(NewRole {
                name: "Manager".into(),
                description: None,
                permission_ids: vec![],
                is_active: true,
            })
            .await
            .expect("role");
        store
            .create_user(new_user("one@x.com", vec![role.role.id]))
            .await
            .expect("user");
        store
            .create_user(new_user("two@x.com", vec![]))
            .await
            .expect("user");

        let mut query = UserQuery {
            page: 1,
            limit: 10,
            search: None,
            role: Some("Manager".into()),
            is_active: None,
            sort_by: UserSortField::Email,
            sort_order: SortOrder::Asc,
        };
        let page = store.list_users(&query).await.expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user.email, "one@x.com");

        query.role = None;
        query.search = Some("TWO".into());
        let page = store.list_users(&query).await.expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user.email, "two@x.com");

        query.search = None;
        query.limit = 1;
        query.page = 2;
        let page = store.list_users(&query).await.expect("list");
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].user.email, "two@x.com");
    }
}
