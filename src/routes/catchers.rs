//! JSON catchers. Guard rejections carry their own body in the request-local cache;
//! every other unmatched status gets a generic message.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{Catcher, Request, catch, catchers};

use crate::auth::guards::GuardRejection;
use crate::auth::responses::AuthErrorResponse;

#[catch(default)]
pub fn default_catcher(status: Status, request: &Request<'_>) -> status::Custom<Json<AuthErrorResponse>> {
    if let GuardRejection(Some(body)) = request.local_cache(GuardRejection::default) {
        let status = Status::from_code(body.status).unwrap_or(status);
        return status::Custom(status, Json(body.clone()));
    }

    // Unparseable query strings and bodies surface as 422 from Rocket.
    let status = if status == Status::UnprocessableEntity {
        Status::BadRequest
    } else {
        status
    };
    let message = match status.code {
        400 => "invalid request".to_string(),
        404 => "resource not found".to_string(),
        500 => "internal server error".to_string(),
        _ => status.reason_lossy().to_lowercase(),
    };
    status::Custom(status, Json(AuthErrorResponse::new(status.code, message)))
}

pub fn all() -> Vec<Catcher> {
    catchers![default_catcher]
}
