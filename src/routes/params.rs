//! Query parameter helpers shared by the list endpoints.
//!
//! These structs provide strongly-typed parsing for URL query strings while exposing the
//! metadata needed for OpenAPI generation via `rocket_okapi`. Each converts into the
//! store-level query with page and limit normalized.

use rocket::form::{self, FromFormField, ValueField};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::store::{
    PermissionQuery, PermissionSortField, RoleQuery, RoleSortField, SortOrder, UserQuery,
    UserSortField,
};

const fn default_page() -> i64 {
    1
}

const fn default_limit() -> i64 {
    10
}

pub const MAX_LIMIT: i64 = 100;

fn default_sort_order() -> SortOrder {
    SortOrder::Desc
}

fn default_user_sort_field() -> UserSortField {
    UserSortField::CreatedAt
}

fn default_role_sort_field() -> RoleSortField {
    RoleSortField::CreatedAt
}

fn default_permission_sort_field() -> PermissionSortField {
    PermissionSortField::CreatedAt
}

fn normalized_page(page: i64) -> i64 {
    page.max(1)
}

fn normalized_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIMIT)
}

/// Trimmed search term with empty strings removed.
fn normalized_term(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<'r> FromFormField<'r> for SortOrder {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(form::Error::validation(format!(
                "invalid sort order '{other}'; expected 'asc' or 'desc'"
            ))
            .into()),
        }
    }
}

impl<'r> FromFormField<'r> for UserSortField {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value {
            "firstName" => Ok(UserSortField::FirstName),
            "lastName" => Ok(UserSortField::LastName),
            "email" => Ok(UserSortField::Email),
            "createdAt" => Ok(UserSortField::CreatedAt),
            other => Err(form::Error::validation(format!("invalid user sort key '{other}'")).into()),
        }
    }
}

impl<'r> FromFormField<'r> for RoleSortField {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value {
            "name" => Ok(RoleSortField::Name),
            "createdAt" => Ok(RoleSortField::CreatedAt),
            other => Err(form::Error::validation(format!("invalid role sort key '{other}'")).into()),
        }
    }
}

impl<'r> FromFormField<'r> for PermissionSortField {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value {
            "name" => Ok(PermissionSortField::Name),
            "resource" => Ok(PermissionSortField::Resource),
            "action" => Ok(PermissionSortField::Action),
            "createdAt" => Ok(PermissionSortField::CreatedAt),
            other => Err(
                form::Error::validation(format!("invalid permission sort key '{other}'")).into(),
            ),
        }
    }
}

/// Query parameters accepted by `GET /users`.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserListParams {
    /// Page of results to fetch (defaults to 1).
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Page size (defaults to 10, maximum 100).
    #[field(default = 10)]
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Case-insensitive match on first name, last name or email.
    #[serde(default)]
    pub search: Option<String>,
    /// Only users holding the role with this name.
    #[serde(default)]
    pub role: Option<String>,
    #[field(name = "isActive")]
    #[serde(default)]
    pub is_active: Option<bool>,
    #[field(name = "sortBy", default = UserSortField::CreatedAt)]
    #[serde(default = "default_user_sort_field")]
    pub sort_by: UserSortField,
    #[field(name = "sortOrder", default = SortOrder::Desc)]
    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,
}

impl UserListParams {
    pub fn to_query(&self) -> UserQuery {
        UserQuery {
            page: normalized_page(self.page),
            limit: normalized_limit(self.limit),
            search: normalized_term(&self.search),
            role: normalized_term(&self.role),
            is_active: self.is_active,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}

/// Query parameters accepted by `GET /roles`.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleListParams {
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 10)]
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Case-insensitive match on name or description.
    #[serde(default)]
    pub search: Option<String>,
    #[field(name = "isActive")]
    #[serde(default)]
    pub is_active: Option<bool>,
    #[field(name = "sortBy", default = RoleSortField::CreatedAt)]
    #[serde(default = "default_role_sort_field")]
    pub sort_by: RoleSortField,
    #[field(name = "sortOrder", default = SortOrder::Desc)]
    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,
}

impl RoleListParams {
    pub fn to_query(&self) -> RoleQuery {
        RoleQuery {
            page: normalized_page(self.page),
            limit: normalized_limit(self.limit),
            search: normalized_term(&self.search),
            is_active: self.is_active,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}

/// Query parameters accepted by `GET /roles/permissions`.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionListParams {
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 10)]
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Case-insensitive match on name or description.
    #[serde(default)]
    pub search: Option<String>,
    /// Exact resource filter, e.g. `user`.
    #[serde(default)]
    pub resource: Option<String>,
    /// Exact action filter, e.g. `read`.
    #[serde(default)]
    pub action: Option<String>,
    #[field(name = "isActive")]
    #[serde(default)]
    pub is_active: Option<bool>,
    #[field(name = "sortBy", default = PermissionSortField::CreatedAt)]
    #[serde(default = "default_permission_sort_field")]
    pub sort_by: PermissionSortField,
    #[field(name = "sortOrder", default = SortOrder::Desc)]
    #[serde(default = "default_sort_order")]
    pub sort_order: SortOrder,
}

impl PermissionListParams {
    pub fn to_query(&self) -> PermissionQuery {
        PermissionQuery {
            page: normalized_page(self.page),
            limit: normalized_limit(self.limit),
            search: normalized_term(&self.search),
            resource: normalized_term(&self.resource),
            action: normalized_term(&self.action),
            is_active: self.is_active,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_params_are_normalized() {
        let params = UserListParams {
            page: 0,
            limit: 500,
            search: Some("   ".into()),
            role: Some(" Admin ".into()),
            is_active: Some(true),
            sort_by: UserSortField::Email,
            sort_order: SortOrder::Asc,
        };
        let query = params.to_query();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_LIMIT);
        assert_eq!(query.search, None);
        assert_eq!(query.role.as_deref(), Some("Admin"));
        assert_eq!(query.sort_by, UserSortField::Email);
    }

    #[test]
    fn permission_params_keep_filters() {
        let params = PermissionListParams {
            page: 2,
            limit: 0,
            search: None,
            resource: Some("user".into()),
            action: Some("read".into()),
            is_active: None,
            sort_by: PermissionSortField::Name,
            sort_order: SortOrder::Desc,
        };
        let query = params.to_query();
        assert_eq!(query.limit, 1);
        assert_eq!(query.offset(), 1);
        assert_eq!(query.resource.as_deref(), Some("user"));
        assert_eq!(query.action.as_deref(), Some("read"));
    }

    #[test]
    fn serde_defaults_match_query_string_defaults() {
        let users: UserListParams = serde_json::from_str("{}").expect("user params");
        assert_eq!(users.page, 1);
        assert_eq!(users.limit, 10);
        assert_eq!(users.sort_by, UserSortField::CreatedAt);
        assert_eq!(users.sort_order, SortOrder::Desc);

        let roles: RoleListParams = serde_json::from_str("{}").expect("role params");
        assert_eq!(roles.sort_by, RoleSortField::CreatedAt);
        assert_eq!(roles.sort_order, SortOrder::Desc);

        let permissions: PermissionListParams =
            serde_json::from_str("{}").expect("permission params");
        assert_eq!(permissions.sort_by, PermissionSortField::CreatedAt);
        assert_eq!(permissions.sort_order, SortOrder::Desc);
    }
}
