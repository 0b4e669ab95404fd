//! Persistence for users, roles and permissions.
//!
//! Handlers and the authentication flow only see the [`RbacStore`] trait. The Postgres
//! implementation backs the server; the in-memory one backs tests and local tooling.
//! Every mutation that the login path depends on (failure counters, lockout, one-time
//! code consumption) is a single statement or a single critical section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::lockout::LockoutState;
use crate::auth::passwords::HashedPassword;
use crate::models::{
    NewPermission, NewRole, NewUser, Page, Permission, PermissionChanges, Role, RoleChanges,
    RoleWithPermissions, StoredCode, User, UserChanges, UserRecord, UserWithRoles,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store handle shared through Rocket managed state.
pub type SharedStore = Arc<dyn RbacStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} '{value}' already exists")]
    Conflict { entity: &'static str, value: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Sort direction for list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum UserSortField {
    FirstName,
    LastName,
    Email,
    #[default]
    CreatedAt,
}

impl UserSortField {
    pub fn sql_column(self) -> &'static str {
        match self {
            UserSortField::FirstName => "first_name",
            UserSortField::LastName => "last_name",
            UserSortField::Email => "email",
            UserSortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RoleSortField {
    Name,
    #[default]
    CreatedAt,
}

impl RoleSortField {
    pub fn sql_column(self) -> &'static str {
        match self {
            RoleSortField::Name => "name",
            RoleSortField::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum PermissionSortField {
    Name,
    Resource,
    Action,
    #[default]
    CreatedAt,
}

impl PermissionSortField {
    pub fn sql_column(self) -> &'static str {
        match self {
            PermissionSortField::Name => "name",
            PermissionSortField::Resource => "resource",
            PermissionSortField::Action => "action",
            PermissionSortField::CreatedAt => "created_at",
        }
    }
}

/// Filters for user listings. `search` matches first name, last name or email.
#[derive(Debug, Clone)]
pub struct UserQuery {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub sort_by: UserSortField,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct RoleQuery {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub sort_by: RoleSortField,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct PermissionQuery {
    pub page: i64,
    pub limit: i64,
    pub search: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub is_active: Option<bool>,
    pub sort_by: PermissionSortField,
    pub sort_order: SortOrder,
}

fn offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1) * limit
}

impl UserQuery {
    pub fn offset(&self) -> i64 {
        offset(self.page, self.limit)
    }
}

impl RoleQuery {
    pub fn offset(&self) -> i64 {
        offset(self.page, self.limit)
    }
}

impl PermissionQuery {
    pub fn offset(&self) -> i64 {
        offset(self.page, self.limit)
    }
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
            role: None,
            is_active: None,
            sort_by: UserSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl Default for RoleQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
            is_active: None,
            sort_by: RoleSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl Default for PermissionQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            search: None,
            resource: None,
            action: None,
            is_active: None,
            sort_by: PermissionSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

#[rocket::async_trait]
pub trait RbacStore: Send + Sync {
    // ----- users -----

    /// Look up a user by normalized email, including credential and lockout state.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn find_user_record(&self, id: Uuid) -> StoreResult<Option<UserRecord>>;

    /// Fully resolved aggregate: the user, its roles, and each role's permissions.
    async fn load_user_with_roles(&self, id: Uuid) -> StoreResult<Option<UserWithRoles>>;

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<UserWithRoles>>;

    async fn create_user(&self, new_user: NewUser) -> StoreResult<User>;

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User>;

    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;

    /// Persist the lockout state computed after a failed password check.
    async fn record_login_failure(&self, id: Uuid, state: LockoutState) -> StoreResult<()>;

    /// Clear the failure counter and lock, and stamp `last_login`.
    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;

    async fn set_password(&self, id: Uuid, password_hash: &HashedPassword) -> StoreResult<()>;

    async fn set_verification_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()>;

    async fn set_reset_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()>;

    /// Atomically match an unexpired verification code by digest, mark the email as
    /// verified and clear the code.
    async fn consume_verification_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Atomically match an unexpired reset code by digest, replace the password hash and
    /// clear the code.
    async fn consume_reset_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
        password_hash: &HashedPassword,
    ) -> StoreResult<Option<User>>;

    // ----- roles -----

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Page<RoleWithPermissions>>;

    async fn find_role(&self, id: Uuid) -> StoreResult<Option<RoleWithPermissions>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn find_roles_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Role>>;

    async fn create_role(&self, new_role: NewRole) -> StoreResult<RoleWithPermissions>;

    async fn update_role(&self, id: Uuid, changes: RoleChanges)
    -> StoreResult<RoleWithPermissions>;

    async fn delete_role(&self, id: Uuid) -> StoreResult<()>;

    // ----- permissions -----

    async fn list_permissions(&self, query: &PermissionQuery) -> StoreResult<Page<Permission>>;

    async fn find_permission(&self, id: Uuid) -> StoreResult<Option<Permission>>;

    async fn find_permissions_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Permission>>;

    async fn find_permissions_by_names(&self, names: &[String]) -> StoreResult<Vec<Permission>>;

    async fn create_permission(&self, new_permission: NewPermission) -> StoreResult<Permission>;

    async fn update_permission(
        &self,
        id: Uuid,
        changes: PermissionChanges,
    ) -> StoreResult<Permission>;

    /// Delete a permission and detach it from every role.
    async fn delete_permission(&self, id: Uuid) -> StoreResult<()>;

    async fn close(&self) {}
}

/// Remove duplicate ids while keeping the first occurrence of each.
pub fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup_ids(&[a, b, a, b, a]), vec![a, b]);
    }

    #[test]
    fn offset_starts_at_zero() {
        assert_eq!(offset(1, 10), 0);
        assert_eq!(offset(3, 10), 20);
        assert_eq!(offset(0, 10), 0);
    }
}
