//! JSON request bodies that reject with per-field errors.
//!
//! Rocket's `Json<T>` answers a body that fails to deserialize with a bare 422. `JsonBody<T>`
//! wraps it and turns the serde error into a 400 validation response naming the offending
//! field, rendered through the default catcher.

use std::ops::Deref;

use rocket::data::{self, Data, FromData};
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::serde::json::{self, Json};
use rocket::Request;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::RequestBody;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::request::OpenApiFromData;
use serde::Deserialize;

use crate::auth::AuthError;
use crate::auth::guards::GuardRejection;
use crate::auth::responses::AuthErrorResponse;
use crate::validation::FieldError;

const BODY_FIELD: &str = "body";

#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<T> JsonBody<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for JsonBody<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Maps a body deserialization failure to the field it concerns.
pub fn body_field_error(err: &json::Error<'_>) -> FieldError {
    match err {
        json::Error::Parse(_, parse) => {
            let text = parse.to_string();
            let message = match text.find(" at line ") {
                Some(idx) => text[..idx].to_string(),
                None => text.clone(),
            };
            let field = missing_field_name(&message).unwrap_or(BODY_FIELD).to_string();
            FieldError { field, message }
        }
        json::Error::Io(io) => FieldError {
            field: BODY_FIELD.to_string(),
            message: format!("could not read request body: {io}"),
        },
    }
}

/// Field name out of serde's "missing field" message.
fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[rocket::async_trait]
impl<'r, T: Deserialize<'r>> FromData<'r> for JsonBody<T> {
    type Error = AuthErrorResponse;

    async fn from_data(request: &'r Request<'_>, data: Data<'r>) -> data::Outcome<'r, Self> {
        match Json::<T>::from_data(request, data).await {
            Outcome::Success(Json(value)) => Outcome::Success(JsonBody(value)),
            Outcome::Forward(forward) => Outcome::Forward(forward),
            Outcome::Error((status, err)) => {
                let field = body_field_error(&err);
                log::debug!("rejected request body: {}: {}", field.field, field.message);

                let status = if status == Status::UnprocessableEntity {
                    Status::BadRequest
                } else {
                    status
                };
                let mut body = AuthErrorResponse::from(&AuthError::Validation(vec![field]));
                body.status = status.code;
                request.local_cache(|| GuardRejection(Some(body.clone())));
                Outcome::Error((status, body))
            }
        }
    }
}

impl<'r, T: JsonSchema + Deserialize<'r>> OpenApiFromData<'r> for JsonBody<T> {
    fn request_body(r#gen: &mut OpenApiGenerator) -> rocket_okapi::Result<RequestBody> {
        Json::<T>::request_body(r#gen)
    }
}
