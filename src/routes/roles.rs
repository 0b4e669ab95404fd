//! Role administration endpoints.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::guards::{
    AuthUser, Require, RoleCreate, RoleDelete, RoleRead, RoleUpdate, UserUpdate,
};
use crate::auth::RequiredPermission;
use crate::error::ApiError;
use crate::models::{
    DataResponse, MessageResponse, NewRole, PaginatedResponse, RoleChanges, RoleWithPermissions,
};
use crate::routes::body::JsonBody;
use crate::routes::helpers::{ensure_permissions_exist, load_role, resolve_permission_refs};
use crate::routes::params::RoleListParams;
use crate::seed_data::is_system_role;
use crate::store::SharedStore;
use crate::validation::{MAX_DESCRIPTION_LEN, MAX_NAME_LEN, Validator};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Permission ids granted by the role.
    #[serde(default)]
    pub permissions: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Permission ids or permission names; a list is read as ids only if every entry is
    /// a UUID.
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachPermissionsRequest {
    pub permission_ids: Vec<Uuid>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

fn validate_role_fields(name: Option<&str>, description: Option<&str>) -> Result<(), ApiError> {
    let mut validator = Validator::new();
    if let Some(name) = name {
        validator.length("name", name, 1, MAX_NAME_LEN);
    }
    if let Some(description) = description {
        validator.length("description", description, 0, MAX_DESCRIPTION_LEN);
    }
    validator.finish().map_err(ApiError::Validation)
}

#[openapi(tag = "Roles")]
#[get("/roles?<params..>")]
pub async fn list_roles(
    store: &State<SharedStore>,
    _caller: Require<RoleRead>,
    params: RoleListParams,
) -> Result<Json<PaginatedResponse<RoleWithPermissions>>, ApiError> {
    let page = store.list_roles(&params.to_query()).await?;
    Ok(Json(page.into()))
}

/// Fetch a role. User managers may read it too, since they assign roles.
#[openapi(tag = "Roles")]
#[get("/roles/<id>")]
pub async fn get_role(
    store: &State<SharedStore>,
    caller: AuthUser,
    id: Uuid,
) -> Result<Json<DataResponse<RoleWithPermissions>>, ApiError> {
    caller.require_any(&[RoleRead::NAME, UserUpdate::NAME])?;
    let role = load_role(store.inner().as_ref(), id).await?;
    Ok(Json(DataResponse { data: role }))
}

#[openapi(tag = "Roles")]
#[post("/roles", data = "<payload>")]
pub async fn create_role(
    store: &State<SharedStore>,
    caller: Require<RoleCreate>,
    payload: JsonBody<CreateRoleRequest>,
) -> Result<status::Custom<Json<DataResponse<RoleWithPermissions>>>, ApiError> {
    let payload = payload.into_inner();
    let name = payload.name.trim().to_string();
    let description = trimmed(payload.description);
    validate_role_fields(Some(&name), description.as_deref())?;

    if store.find_role_by_name(&name).await?.is_some() {
        return Err(ApiError::Conflict(format!("role '{name}' already exists")));
    }

    let permission_ids = match payload.permissions {
        Some(ids) => ensure_permissions_exist(store.inner().as_ref(), &ids).await?,
        None => Vec::new(),
    };

    let role = store
        .create_role(NewRole {
            name,
            description,
            permission_ids,
            is_active: true,
        })
        .await?;

    log::info!("role '{}' created by {}", role.role.name, caller.id);
    Ok(status::Custom(Status::Created, Json(DataResponse { data: role })))
}

#[openapi(tag = "Roles")]
#[put("/roles/<id>", data = "<payload>")]
pub async fn update_role(
    store: &State<SharedStore>,
    caller: Require<RoleUpdate>,
    id: Uuid,
    payload: JsonBody<UpdateRoleRequest>,
) -> Result<Json<DataResponse<RoleWithPermissions>>, ApiError> {
    let payload = payload.into_inner();
    let name = trimmed(payload.name);
    let description = trimmed(payload.description);
    validate_role_fields(name.as_deref(), description.as_deref())?;

    let current = load_role(store.inner().as_ref(), id).await?;

    if let Some(name) = &name {
        if *name != current.role.name {
            if let Some(existing) = store.find_role_by_name(name).await? {
                if existing.id != id {
                    return Err(ApiError::Conflict(format!("role '{name}' already exists")));
                }
            }
        }
    }

    let permission_ids = match payload.permissions {
        Some(refs) => Some(resolve_permission_refs(store.inner().as_ref(), &refs).await?),
        None => None,
    };

    let role = store
        .update_role(
            id,
            RoleChanges {
                name,
                description,
                permission_ids,
                is_active: payload.is_active,
            },
        )
        .await?;

    log::info!("role {} updated by {}", id, caller.id);
    Ok(Json(DataResponse { data: role }))
}

/// Delete a role. The built-in roles are protected.
#[openapi(tag = "Roles")]
#[delete("/roles/<id>")]
pub async fn delete_role(
    store: &State<SharedStore>,
    caller: Require<RoleDelete>,
    id: Uuid,
) -> Result<Json<MessageResponse>, ApiError> {
    let role = load_role(store.inner().as_ref(), id).await?;
    if is_system_role(&role.role.name) {
        return Err(ApiError::BadRequest(
            "system roles cannot be deleted".to_string(),
        ));
    }

    store.delete_role(id).await?;
    log::info!("role '{}' deleted by {}", role.role.name, caller.id);
    Ok(Json(MessageResponse::new("role deleted")))
}

/// Replace the role's permission set.
#[openapi(tag = "Roles")]
#[post("/roles/<id>/attach-permissions", data = "<payload>")]
pub async fn attach_permissions(
    store: &State<SharedStore>,
    caller: Require<RoleUpdate>,
    id: Uuid,
    payload: JsonBody<AttachPermissionsRequest>,
) -> Result<Json<DataResponse<RoleWithPermissions>>, ApiError> {
    load_role(store.inner().as_ref(), id).await?;
    let permission_ids =
        ensure_permissions_exist(store.inner().as_ref(), &payload.permission_ids).await?;

    let role = store
        .update_role(
            id,
            RoleChanges {
                permission_ids: Some(permission_ids),
                ..Default::default()
            },
        )
        .await?;

    log::info!("permissions attached to role {} by {}", id, caller.id);
    Ok(Json(DataResponse { data: role }))
}
