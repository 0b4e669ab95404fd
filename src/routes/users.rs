//! User administration endpoints.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post, put};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::guards::{
    AuthUser, Require, RoleRead, UserCreate, UserDelete, UserRead, UserUpdate,
};
use crate::auth::RequiredPermission;
use crate::auth::AuthService;
use crate::error::ApiError;
use crate::models::{
    DataResponse, MessageResponse, NewUser, PaginatedResponse, User, UserChanges, UserWithRoles,
};
use crate::routes::body::JsonBody;
use crate::routes::helpers::{ensure_grantable_roles, load_user};
use crate::routes::params::UserListParams;
use crate::seed_data::DEFAULT_ROLE_NAME;
use crate::store::{SharedStore, StoreError};
use crate::validation::{MAX_NAME_LEN, Validator, normalize_email};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    /// Role ids; defaults to the standard user role when omitted or empty.
    #[serde(default, alias = "roleIds")]
    pub roles: Option<Vec<Uuid>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "roleIds")]
    pub roles: Option<Vec<Uuid>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignRolesRequest {
    pub role_ids: Vec<Uuid>,
}

/// List users with pagination, search, role and status filters.
#[openapi(tag = "Users")]
#[get("/users?<params..>")]
pub async fn list_users(
    store: &State<SharedStore>,
    _caller: Require<UserRead>,
    params: UserListParams,
) -> Result<Json<PaginatedResponse<UserWithRoles>>, ApiError> {
    let page = store.list_users(&params.to_query()).await?;
    Ok(Json(page.into()))
}

/// Fetch a user. Callers may always read their own record.
#[openapi(tag = "Users")]
#[get("/users/<id>")]
pub async fn get_user(
    store: &State<SharedStore>,
    caller: AuthUser,
    id: Uuid,
) -> Result<Json<DataResponse<UserWithRoles>>, ApiError> {
    caller.require_owner_or(id, "user.read")?;
    let user = load_user(store.inner().as_ref(), id).await?;
    Ok(Json(DataResponse { data: user }))
}

#[openapi(tag = "Users")]
#[post("/users", data = "<payload>")]
pub async fn create_user(
    store: &State<SharedStore>,
    service: &State<AuthService>,
    caller: Require<UserCreate>,
    payload: JsonBody<CreateUserRequest>,
) -> Result<status::Custom<Json<DataResponse<UserWithRoles>>>, ApiError> {
    let payload = payload.into_inner();
    let email = normalize_email(&payload.email);
    let first_name = payload.first_name.trim().to_string();
    let last_name = payload.last_name.trim().to_string();

    let mut validator = Validator::new();
    validator
        .email("email", &email)
        .password_length("password", &payload.password)
        .length("firstName", &first_name, 1, MAX_NAME_LEN)
        .length("lastName", &last_name, 1, MAX_NAME_LEN);
    validator.finish().map_err(ApiError::Validation)?;

    if store.find_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict(
            "a user with this email already exists".to_string(),
        ));
    }

    let role_ids = match payload.roles.filter(|ids| !ids.is_empty()) {
        Some(ids) => ensure_grantable_roles(store.inner().as_ref(), &caller, &ids).await?,
        None => {
            let role = store
                .find_role_by_name(DEFAULT_ROLE_NAME)
                .await?
                .ok_or_else(|| {
                    ApiError::Internal(format!("default role '{DEFAULT_ROLE_NAME}' is missing"))
                })?;
            vec![role.id]
        }
    };

    let password_hash = service
        .passwords()
        .hash_password_blocking(payload.password)
        .await?;

    let user = store
        .create_user(NewUser {
            email,
            password_hash,
            first_name,
            last_name,
            role_ids,
            is_active: payload.is_active.unwrap_or(true),
            email_verified: true,
            verification_code: None,
        })
        .await
        .map_err(|err| match err {
            StoreError::Conflict { .. } => {
                ApiError::Conflict("a user with this email already exists".to_string())
            }
            other => other.into(),
        })?;

    log::info!("user {} created by {}", user.id, caller.id);
    let user = load_user(store.inner().as_ref(), user.id).await?;
    Ok(status::Custom(Status::Created, Json(DataResponse { data: user })))
}

/// Update names, roles or the active flag. Callers cannot change their own active flag.
#[openapi(tag = "Users")]
#[put("/users/<id>", data = "<payload>")]
pub async fn update_user(
    store: &State<SharedStore>,
    caller: Require<UserUpdate>,
    id: Uuid,
    payload: JsonBody<UpdateUserRequest>,
) -> Result<Json<DataResponse<UserWithRoles>>, ApiError> {
    let payload = payload.into_inner();
    let first_name = payload.first_name.map(|name| name.trim().to_string());
    let last_name = payload.last_name.map(|name| name.trim().to_string());

    let mut validator = Validator::new();
    if let Some(name) = &first_name {
        validator.length("firstName", name, 1, MAX_NAME_LEN);
    }
    if let Some(name) = &last_name {
        validator.length("lastName", name, 1, MAX_NAME_LEN);
    }
    validator.finish().map_err(ApiError::Validation)?;

    load_user(store.inner().as_ref(), id).await?;

    if payload.is_active.is_some() && caller.is_self(id) {
        return Err(ApiError::BadRequest(
            "you cannot change your own active status".to_string(),
        ));
    }

    let role_ids = match payload.roles {
        Some(ids) => Some(ensure_grantable_roles(store.inner().as_ref(), &caller, &ids).await?),
        None => None,
    };

    let changes = UserChanges {
        first_name,
        last_name,
        is_active: payload.is_active,
        role_ids,
    };
    if !changes.is_empty() {
        store.update_user(id, changes).await?;
        log::info!("user {} updated by {}", id, caller.id);
    }

    let user = load_user(store.inner().as_ref(), id).await?;
    Ok(Json(DataResponse { data: user }))
}

#[openapi(tag = "Users")]
#[delete("/users/<id>")]
pub async fn delete_user(
    store: &State<SharedStore>,
    caller: Require<UserDelete>,
    id: Uuid,
) -> Result<Json<MessageResponse>, ApiError> {
    if caller.is_self(id) {
        return Err(ApiError::BadRequest(
            "you cannot delete your own account".to_string(),
        ));
    }

    store.delete_user(id).await?;
    log::info!("user {} deleted by {}", id, caller.id);
    Ok(Json(MessageResponse::new("user deleted")))
}

#[openapi(tag = "Users")]
#[patch("/users/<id>/toggle-status")]
pub async fn toggle_user_status(
    store: &State<SharedStore>,
    caller: Require<UserUpdate>,
    id: Uuid,
) -> Result<Json<DataResponse<User>>, ApiError> {
    if caller.is_self(id) {
        return Err(ApiError::BadRequest(
            "you cannot change your own status".to_string(),
        ));
    }

    let current = load_user(store.inner().as_ref(), id).await?;
    let user = store
        .update_user(
            id,
            UserChanges {
                is_active: Some(!current.user.is_active),
                ..Default::default()
            },
        )
        .await?;

    log::info!(
        "user {} {} by {}",
        id,
        if user.is_active { "activated" } else { "deactivated" },
        caller.id
    );
    Ok(Json(DataResponse { data: user }))
}

/// Replace the user's role set.
#[openapi(tag = "Users")]
#[post("/users/<id>/assign-roles", data = "<payload>")]
pub async fn assign_roles(
    store: &State<SharedStore>,
    caller: AuthUser,
    id: Uuid,
    payload: JsonBody<AssignRolesRequest>,
) -> Result<Json<DataResponse<UserWithRoles>>, ApiError> {
    caller.require_all(&[UserUpdate::NAME, RoleRead::NAME])?;
    load_user(store.inner().as_ref(), id).await?;
    let role_ids =
        ensure_grantable_roles(store.inner().as_ref(), &caller, &payload.role_ids).await?;

    store
        .update_user(
            id,
            UserChanges {
                role_ids: Some(role_ids),
                ..Default::default()
            },
        )
        .await?;

    log::info!("roles assigned to user {} by {}", id, caller.id);
    let user = load_user(store.inner().as_ref(), id).await?;
    Ok(Json(DataResponse { data: user }))
}
