use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::Map;
use rocket_okapi::okapi::openapi3::{MediaType, RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use thiserror::Error;

use crate::auth::AuthError;
use crate::auth::responses::AuthErrorResponse;
use crate::store::StoreError;
use crate::validation::FieldError;

/// Errors returned by the user, role and permission handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("store error: {0}")]
    Store(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Auth(err) => err.status(),
            ApiError::Store(_) | ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    fn into_body(self) -> AuthErrorResponse {
        let status = self.status();
        match self {
            ApiError::Validation(errors) => {
                log::debug!("validation failed: {} field(s)", errors.len());
                let mut body = AuthErrorResponse::new(status.code, "validation failed");
                body.errors = Some(errors);
                body
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                AuthErrorResponse::new(status.code, msg)
            }
            ApiError::Conflict(msg) => {
                log::debug!("conflict: {}", msg);
                AuthErrorResponse::new(status.code, msg)
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                AuthErrorResponse::new(status.code, msg)
            }
            ApiError::Auth(err) => {
                if err.is_internal() {
                    log::error!("auth error: {}", err);
                }
                AuthErrorResponse::from(&err)
            }
            ApiError::Store(err) => {
                log::error!("store error: {}", err);
                AuthErrorResponse::new(status.code, "internal server error")
            }
            ApiError::Internal(msg) => {
                log::error!("internal error: {}", msg);
                AuthErrorResponse::new(status.code, "internal server error")
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let body = self.into_body();

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            format!(r#"{{"status":{},"message":"internal server error"}}"#, status.code)
        });

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let schema = generator.json_schema::<AuthErrorResponse>();
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Invalid request or validation failure"),
            ("401", "Missing or invalid access token"),
            ("403", "Caller lacks a required permission"),
            ("404", "Resource not found"),
            ("409", "Resource already exists"),
            ("500", "Internal server error"),
        ] {
            let mut content = Map::new();
            content.insert(
                "application/json".to_string(),
                MediaType {
                    schema: Some(schema.clone()),
                    ..Default::default()
                },
            );
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    content,
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::NotFound(entity) => ApiError::NotFound(format!("{entity} not found")),
            other => ApiError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_client_statuses() {
        let conflict = ApiError::from(StoreError::Conflict {
            entity: "role",
            value: "Admin".into(),
        });
        assert_eq!(conflict.status(), Status::Conflict);
        assert_eq!(conflict.to_string(), "role 'Admin' already exists");

        let missing = ApiError::from(StoreError::NotFound("user"));
        assert_eq!(missing.status(), Status::NotFound);
        assert_eq!(missing.to_string(), "user not found");
    }

    #[test]
    fn internal_errors_hide_details() {
        let body = ApiError::Internal("pool timed out".into()).into_body();
        assert_eq!(body.status, 500);
        assert_eq!(body.message, "internal server error");
    }

    #[test]
    fn forbidden_names_required_permissions() {
        let body = ApiError::from(AuthError::Forbidden {
            required: vec!["user.delete".into()],
        })
        .into_body();
        assert_eq!(body.status, 403);
        assert_eq!(body.required_permissions, Some(vec!["user.delete".to_string()]));
    }
}
