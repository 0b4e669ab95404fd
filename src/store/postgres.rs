//! PostgreSQL implementation of [`RbacStore`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::auth::lockout::LockoutState;
use crate::auth::passwords::HashedPassword;
use crate::models::{
    NewPermission, NewRole, NewUser, Page, Permission, PermissionChanges, PermissionName, Role,
    RoleChanges, RoleWithPermissions, StoredCode, User, UserChanges, UserRecord, UserWithRoles,
};
use crate::store::{
    PermissionQuery, RbacStore, RoleQuery, StoreError, StoreResult, UserQuery, dedup_ids,
};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const USER_COLUMNS: &str = "id, email, first_name, last_name, is_active, email_verified, \
     last_login, created_at, updated_at";

const USER_RECORD_COLUMNS: &str = "id, email, first_name, last_name, is_active, \
     email_verified, last_login, created_at, updated_at, password_hash, failed_login_attempts, \
     locked_until, ARRAY(SELECT role_id FROM user_roles WHERE user_id = users.id) AS role_ids";

const ROLE_COLUMNS: &str = "id, name, description, is_active, created_at, updated_at";

const PERMISSION_COLUMNS: &str =
    "id, name, resource, action, description, is_active, created_at, updated_at";

/// Apply pending migrations from `./migrations`.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn permissions_for_roles(
        &self,
        role_ids: &[Uuid],
    ) -> StoreResult<HashMap<Uuid, Vec<Permission>>> {
        let mut by_role: HashMap<Uuid, Vec<Permission>> = HashMap::new();
        if role_ids.is_empty() {
            return Ok(by_role);
        }

        let rows = sqlx::query(
            r#"
            SELECT rp.role_id, p.id, p.name, p.resource, p.action, p.description,
                   p.is_active, p.created_at, p.updated_at
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY p.name
            "#,
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let role_id: Uuid = row.try_get("role_id")?;
            by_role
                .entry(role_id)
                .or_default()
                .push(permission_from_row(&row)?);
        }
        Ok(by_role)
    }

    async fn resolve_roles(&self, roles: Vec<Role>) -> StoreResult<Vec<RoleWithPermissions>> {
        let ids: Vec<Uuid> = roles.iter().map(|role| role.id).collect();
        let mut permissions = self.permissions_for_roles(&ids).await?;
        Ok(roles
            .into_iter()
            .map(|role| RoleWithPermissions {
                permissions: permissions.remove(&role.id).unwrap_or_default(),
                role,
            })
            .collect())
    }

    /// Roles (with permissions) for a batch of users in two queries.
    async fn roles_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> StoreResult<HashMap<Uuid, Vec<RoleWithPermissions>>> {
        let mut by_user: HashMap<Uuid, Vec<RoleWithPermissions>> = HashMap::new();
        if user_ids.is_empty() {
            return Ok(by_user);
        }

        let rows = sqlx::query(
            r#"
            SELECT ur.user_id, r.id, r.name, r.description, r.is_active, r.created_at, r.updated_at
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1)
            ORDER BY r.name
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for row in &rows {
            let user_id: Uuid = row.try_get("user_id")?;
            assignments.push((user_id, role_from_row(row)?));
        }

        let role_ids = dedup_ids(
            &assignments
                .iter()
                .map(|(_, role)| role.id)
                .collect::<Vec<_>>(),
        );
        let permissions = self.permissions_for_roles(&role_ids).await?;

        for (user_id, role) in assignments {
            let role_permissions = permissions.get(&role.id).cloned().unwrap_or_default();
            by_user.entry(user_id).or_default().push(RoleWithPermissions {
                role,
                permissions: role_permissions,
            });
        }
        Ok(by_user)
    }

    async fn update_user_code(
        &self,
        id: Uuid,
        digest_column: &str,
        expires_column: &str,
        code: &StoredCode,
    ) -> StoreResult<()> {
        let sql = format!(
            "UPDATE users SET {digest_column} = $2, {expires_column} = $3 WHERE id = $1"
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(&code.digest)
            .bind(code.expires_at)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), "user")
    }
}

fn expect_affected(rows: u64, entity: &'static str) -> StoreResult<()> {
    if rows == 0 {
        Err(StoreError::NotFound(entity))
    } else {
        Ok(())
    }
}

/// Translate constraint violations into domain errors.
fn map_write_error(
    err: sqlx::Error,
    entity: &'static str,
    value: &str,
    reference: &'static str,
) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => {
                return StoreError::Conflict {
                    entity,
                    value: value.to_string(),
                };
            }
            Some("23503") => return StoreError::NotFound(reference),
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
        email_verified: row.try_get("email_verified")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_record_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        user: user_from_row(row)?,
        password_hash: HashedPassword::from_stored(row.try_get("password_hash")?),
        lockout: LockoutState {
            failed_attempts: row.try_get("failed_login_attempts")?,
            locked_until: row.try_get("locked_until")?,
        },
        role_ids: row.try_get("role_ids")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    let name: String = row.try_get("name")?;
    Ok(Permission {
        id: row.try_get("id")?,
        name: PermissionName::new(name),
        resource: row.try_get("resource")?,
        action: row.try_get("action")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    if let Some(term) = query.search.as_deref().filter(|term| !term.is_empty()) {
        let pattern = like_pattern(term);
        builder
            .push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(is_active) = query.is_active {
        builder.push(" AND is_active = ").push_bind(is_active);
    }
    if let Some(role) = &query.role {
        builder
            .push(
                " AND EXISTS (SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id \
                 WHERE ur.user_id = users.id AND r.name = ",
            )
            .push_bind(role.clone())
            .push(")");
    }
}

fn push_role_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &RoleQuery) {
    if let Some(term) = query.search.as_deref().filter(|term| !term.is_empty()) {
        let pattern = like_pattern(term);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(is_active) = query.is_active {
        builder.push(" AND is_active = ").push_bind(is_active);
    }
}

fn push_permission_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PermissionQuery) {
    if let Some(term) = query.search.as_deref().filter(|term| !term.is_empty()) {
        let pattern = like_pattern(term);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR resource ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR action ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(resource) = query.resource.as_deref().filter(|value| !value.is_empty()) {
        builder
            .push(" AND resource ILIKE ")
            .push_bind(like_pattern(resource));
    }
    if let Some(action) = query.action.as_deref().filter(|value| !value.is_empty()) {
        builder
            .push(" AND action ILIKE ")
            .push_bind(like_pattern(action));
    }
    if let Some(is_active) = query.is_active {
        builder.push(" AND is_active = ").push_bind(is_active);
    }
}

fn push_page(
    builder: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    order: &str,
    limit: i64,
    offset: i64,
) {
    builder.push(format!(" ORDER BY {column} {order}, id {order}"));
    builder.push(" LIMIT ").push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);
}

#[rocket::async_trait]
impl RbacStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_RECORD_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_record_from_row).transpose()?)
    }

    async fn find_user_record(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_RECORD_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_record_from_row).transpose()?)
    }

    async fn load_user_with_roles(&self, id: Uuid) -> StoreResult<Option<UserWithRoles>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let user = match row {
            Some(row) => user_from_row(&row)?,
            None => return Ok(None),
        };

        let mut roles = self.roles_for_users(&[user.id]).await?;
        Ok(Some(UserWithRoles {
            roles: roles.remove(&user.id).unwrap_or_default(),
            user,
        }))
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<Page<UserWithRoles>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_user_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
        push_user_filters(&mut select, query);
        push_page(
            &mut select,
            query.sort_by.sql_column(),
            query.sort_order.sql_keyword(),
            query.limit,
            query.offset(),
        );
        let rows = select.build().fetch_all(&self.pool).await?;

        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = users.iter().map(|user| user.id).collect();
        let mut roles = self.roles_for_users(&ids).await?;

        let items = users
            .into_iter()
            .map(|user| UserWithRoles {
                roles: roles.remove(&user.id).unwrap_or_default(),
                user,
            })
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let id = Uuid::new_v4();
        let (code_digest, code_expires_at) = match &new_user.verification_code {
            Some(code) => (Some(code.digest.clone()), Some(code.expires_at)),
            None => (None, None),
        };

        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, is_active, \
             email_verified, verification_code_digest, verification_code_expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&new_user.email)
            .bind(new_user.password_hash.as_str())
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(new_user.is_active)
            .bind(new_user.email_verified)
            .bind(code_digest)
            .bind(code_expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, "user", &new_user.email, "user"))?;
        let user = user_from_row(&row)?;

        let role_ids = dedup_ids(&new_user.role_ids);
        if !role_ids.is_empty() {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::uuid[])",
            )
            .bind(id)
            .bind(&role_ids)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, "user", &new_user.email, "role"))?;
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE users SET first_name = COALESCE($2, first_name), \
             last_name = COALESCE($3, last_name), is_active = COALESCE($4, is_active), \
             updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.is_active)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("user"))?;
        let user = user_from_row(&row)?;

        if let Some(role_ids) = changes.role_ids {
            sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let role_ids = dedup_ids(&role_ids);
            if !role_ids.is_empty() {
                sqlx::query(
                    "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::uuid[])",
                )
                .bind(id)
                .bind(&role_ids)
                .execute(&mut *tx)
                .await
                .map_err(|err| map_write_error(err, "user", &user.email, "role"))?;
            }
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), "user")
    }

    async fn record_login_failure(&self, id: Uuid, state: LockoutState) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = $2, locked_until = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(state.failed_attempts)
        .bind(state.locked_until)
        .execute(&self.pool)
        .await?;
        expect_affected(result.rows_affected(), "user")
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        expect_affected(result.rows_affected(), "user")
    }

    async fn set_password(&self, id: Uuid, password_hash: &HashedPassword) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash.as_str())
        .execute(&self.pool)
        .await?;
        expect_affected(result.rows_affected(), "user")
    }

    async fn set_verification_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()> {
        self.update_user_code(
            id,
            "verification_code_digest",
            "verification_code_expires_at",
            code,
        )
        .await
    }

    async fn set_reset_code(&self, id: Uuid, code: &StoredCode) -> StoreResult<()> {
        self.update_user_code(id, "reset_code_digest", "reset_code_expires_at", code)
            .await
    }

    async fn consume_verification_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
            SET email_verified = TRUE,
                verification_code_digest = NULL,
                verification_code_expires_at = NULL,
                updated_at = $2
            WHERE id = (
                SELECT id FROM users
                WHERE verification_code_digest = $1 AND verification_code_expires_at > $2
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(digest)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn consume_reset_code(
        &self,
        digest: &str,
        now: DateTime<Utc>,
        password_hash: &HashedPassword,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                reset_code_digest = NULL,
                reset_code_expires_at = NULL,
                updated_at = $2
            WHERE id = (
                SELECT id FROM users
                WHERE reset_code_digest = $1 AND reset_code_expires_at > $2
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(digest)
            .bind(now)
            .bind(password_hash.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn list_roles(&self, query: &RoleQuery) -> StoreResult<Page<RoleWithPermissions>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM roles WHERE TRUE");
        push_role_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {ROLE_COLUMNS} FROM roles WHERE TRUE"));
        push_role_filters(&mut select, query);
        push_page(
            &mut select,
            query.sort_by.sql_column(),
            query.sort_order.sql_keyword(),
            query.limit,
            query.offset(),
        );
        let rows = select.build().fetch_all(&self.pool).await?;
        let roles = rows
            .iter()
            .map(role_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items: self.resolve_roles(roles).await?,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn find_role(&self, id: Uuid) -> StoreResult<Option<RoleWithPermissions>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let role = role_from_row(&row)?;
                Ok(self.resolve_roles(vec![role]).await?.pop())
            }
            None => Ok(None),
        }
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn find_roles_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1) ORDER BY name");
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(role_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn create_role(&self, new_role: NewRole) -> StoreResult<RoleWithPermissions> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO roles (id, name, description, is_active) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(&new_role.name)
            .bind(&new_role.description)
            .bind(new_role.is_active)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, "role", &new_role.name, "role"))?;

        let permission_ids = dedup_ids(&new_role.permission_ids);
        if !permission_ids.is_empty() {
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::uuid[])",
            )
            .bind(id)
            .bind(&permission_ids)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, "role", &new_role.name, "permission"))?;
        }

        tx.commit().await?;
        self.find_role(id).await?.ok_or(StoreError::NotFound("role"))
    }

    async fn update_role(
        &self,
        id: Uuid,
        changes: RoleChanges,
    ) -> StoreResult<RoleWithPermissions> {
        let mut tx = self.pool.begin().await?;
        let conflict_name = changes.name.clone().unwrap_or_default();

        let result = sqlx::query(
            "UPDATE roles SET name = COALESCE($2, name), description = COALESCE($3, description), \
             is_active = COALESCE($4, is_active), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|err| map_write_error(err, "role", &conflict_name, "role"))?;
        expect_affected(result.rows_affected(), "role")?;

        if let Some(permission_ids) = changes.permission_ids {
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let permission_ids = dedup_ids(&permission_ids);
            if !permission_ids.is_empty() {
                sqlx::query(
                    "INSERT INTO role_permissions (role_id, permission_id) \
                     SELECT $1, UNNEST($2::uuid[])",
                )
                .bind(id)
                .bind(&permission_ids)
                .execute(&mut *tx)
                .await
                .map_err(|err| map_write_error(err, "role", &conflict_name, "permission"))?;
            }
        }

        tx.commit().await?;
        self.find_role(id).await?.ok_or(StoreError::NotFound("role"))
    }

    async fn delete_role(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), "role")
    }

    async fn list_permissions(&self, query: &PermissionQuery) -> StoreResult<Page<Permission>> {
        let mut count =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM permissions WHERE TRUE");
        push_permission_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE TRUE"
        ));
        push_permission_filters(&mut select, query);
        push_page(
            &mut select,
            query.sort_by.sql_column(),
            query.sort_order.sql_keyword(),
            query.limit,
            query.offset(),
        );
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows
                .iter()
                .map(permission_from_row)
                .collect::<Result<Vec<_>, _>>()?,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn find_permission(&self, id: Uuid) -> StoreResult<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(permission_from_row).transpose()?)
    }

    async fn find_permissions_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ANY($1) ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_permissions_by_names(&self, names: &[String]) -> StoreResult<Vec<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = ANY($1) ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(names)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn create_permission(&self, new_permission: NewPermission) -> StoreResult<Permission> {
        let sql = format!(
            "INSERT INTO permissions (id, name, resource, action, description, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {PERMISSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(new_permission.name.as_str())
            .bind(&new_permission.resource)
            .bind(&new_permission.action)
            .bind(&new_permission.description)
            .bind(new_permission.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                map_write_error(err, "permission", new_permission.name.as_str(), "permission")
            })?;
        Ok(permission_from_row(&row)?)
    }

    async fn update_permission(
        &self,
        id: Uuid,
        changes: PermissionChanges,
    ) -> StoreResult<Permission> {
        let conflict_name = changes
            .name
            .as_ref()
            .map(|name| name.to_string())
            .unwrap_or_default();
        let sql = format!(
            "UPDATE permissions SET name = COALESCE($2, name), resource = COALESCE($3, resource), \
             action = COALESCE($4, action), description = COALESCE($5, description), \
             is_active = COALESCE($6, is_active), updated_at = now() \
             WHERE id = $1 RETURNING {PERMISSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(changes.name.map(PermissionName::into_inner))
            .bind(changes.resource)
            .bind(changes.action)
            .bind(changes.description)
            .bind(changes.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_write_error(err, "permission", &conflict_name, "permission"))?
            .ok_or(StoreError::NotFound("permission"))?;
        Ok(permission_from_row(&row)?)
    }

    async fn delete_permission(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), "permission")
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
