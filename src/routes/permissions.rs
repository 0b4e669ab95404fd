//! Permission administration endpoints, mounted under `/roles/permissions`.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::guards::{
    PermissionCreate, PermissionDelete, PermissionRead, PermissionUpdate, Require,
};
use crate::error::ApiError;
use crate::models::{
    DataResponse, MessageResponse, NewPermission, PaginatedResponse, Permission,
    PermissionChanges, PermissionName,
};
use crate::routes::body::JsonBody;
use crate::routes::params::PermissionListParams;
use crate::store::SharedStore;
use crate::validation::{MAX_DESCRIPTION_LEN, MAX_NAME_LEN, Validator};

const MAX_PART_LEN: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePermissionRequest {
    /// `<resource>.<action>`; derived from `resource` and `action` when omitted.
    #[serde(default)]
    pub name: Option<String>,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermissionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

#[openapi(tag = "Permissions")]
#[get("/roles/permissions?<params..>")]
pub async fn list_permissions(
    store: &State<SharedStore>,
    _caller: Require<PermissionRead>,
    params: PermissionListParams,
) -> Result<Json<PaginatedResponse<Permission>>, ApiError> {
    let page = store.list_permissions(&params.to_query()).await?;
    Ok(Json(page.into()))
}

#[openapi(tag = "Permissions")]
#[get("/roles/permissions/<id>")]
pub async fn get_permission(
    store: &State<SharedStore>,
    _caller: Require<PermissionRead>,
    id: Uuid,
) -> Result<Json<DataResponse<Permission>>, ApiError> {
    let permission = store
        .find_permission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("permission not found".to_string()))?;
    Ok(Json(DataResponse { data: permission }))
}

#[openapi(tag = "Permissions")]
#[post("/roles/permissions", data = "<payload>")]
pub async fn create_permission(
    store: &State<SharedStore>,
    caller: Require<PermissionCreate>,
    payload: JsonBody<CreatePermissionRequest>,
) -> Result<status::Custom<Json<DataResponse<Permission>>>, ApiError> {
    let payload = payload.into_inner();
    let resource = payload.resource.trim().to_lowercase();
    let action = payload.action.trim().to_lowercase();
    let name = trimmed(payload.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| PermissionName::from_parts(&resource, &action).into_inner());
    let description = trimmed(payload.description);

    let mut validator = Validator::new();
    validator
        .length("resource", &resource, 1, MAX_PART_LEN)
        .length("action", &action, 1, MAX_PART_LEN)
        .length("name", &name, 1, MAX_NAME_LEN)
        .permission_name("name", &name);
    if let Some(description) = &description {
        validator.length("description", description, 0, MAX_DESCRIPTION_LEN);
    }
    validator.finish().map_err(ApiError::Validation)?;

    if !store
        .find_permissions_by_names(std::slice::from_ref(&name))
        .await?
        .is_empty()
    {
        return Err(ApiError::Conflict(format!(
            "permission '{name}' already exists"
        )));
    }

    let permission = store
        .create_permission(NewPermission {
            name: PermissionName::new(name),
            resource,
            action,
            description,
            is_active: true,
        })
        .await?;

    log::info!("permission '{}' created by {}", permission.name, caller.id);
    Ok(status::Custom(
        Status::Created,
        Json(DataResponse { data: permission }),
    ))
}

#[openapi(tag = "Permissions")]
#[put("/roles/permissions/<id>", data = "<payload>")]
pub async fn update_permission(
    store: &State<SharedStore>,
    caller: Require<PermissionUpdate>,
    id: Uuid,
    payload: JsonBody<UpdatePermissionRequest>,
) -> Result<Json<DataResponse<Permission>>, ApiError> {
    let payload = payload.into_inner();
    let name = trimmed(payload.name);
    let resource = trimmed(payload.resource).map(|v| v.to_lowercase());
    let action = trimmed(payload.action).map(|v| v.to_lowercase());
    let description = trimmed(payload.description);

    let mut validator = Validator::new();
    if let Some(name) = &name {
        validator
            .length("name", name, 1, MAX_NAME_LEN)
            .permission_name("name", name);
    }
    if let Some(resource) = &resource {
        validator.length("resource", resource, 1, MAX_PART_LEN);
    }
    if let Some(action) = &action {
        validator.length("action", action, 1, MAX_PART_LEN);
    }
    if let Some(description) = &description {
        validator.length("description", description, 0, MAX_DESCRIPTION_LEN);
    }
    validator.finish().map_err(ApiError::Validation)?;

    store
        .find_permission(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("permission not found".to_string()))?;

    if let Some(name) = &name {
        let existing = store
            .find_permissions_by_names(std::slice::from_ref(name))
            .await?;
        if existing.iter().any(|permission| permission.id != id) {
            return Err(ApiError::Conflict(format!(
                "permission '{name}' already exists"
            )));
        }
    }

    let permission = store
        .update_permission(
            id,
            PermissionChanges {
                name: name.map(PermissionName::new),
                resource,
                action,
                description,
                is_active: payload.is_active,
            },
        )
        .await?;

    log::info!("permission {} updated by {}", id, caller.id);
    Ok(Json(DataResponse { data: permission }))
}

/// Delete a permission and detach it from every role.
#[openapi(tag = "Permissions")]
#[delete("/roles/permissions/<id>")]
pub async fn delete_permission(
    store: &State<SharedStore>,
    caller: Require<PermissionDelete>,
    id: Uuid,
) -> Result<Json<MessageResponse>, ApiError> {
    store.delete_permission(id).await?;
    log::info!("permission {} deleted by {}", id, caller.id);
    Ok(Json(MessageResponse::new("permission deleted")))
}
