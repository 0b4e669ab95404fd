use chrono::Utc;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use time::Duration as TimeDuration;

use crate::auth::guards::AuthUser;
use crate::auth::rate_limit::{CredentialRateLimit, GeneralRateLimit};
use crate::auth::responses::{
    AuthErrorResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    LoginResponse, ProfileResponse, RefreshResponse, RefreshTokenRequest, RegisterRequest,
    RegisteredUser, ResetPasswordRequest, VerifiedEmail, VerifyEmailRequest,
};
use crate::auth::service::AuthService;
use crate::auth::{AuthConfig, AuthError};
use crate::models::{DataResponse, MessageResponse};
use crate::routes::body::JsonBody;

const ACCESS_COOKIE_PATH: &str = "/";
const REFRESH_COOKIE_PATH: &str = "/api/auth";

pub type AuthRejection = status::Custom<Json<AuthErrorResponse>>;
type AuthRouteResult<T> = Result<Json<T>, AuthRejection>;

#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    _limit: CredentialRateLimit,
    service: &State<AuthService>,
    payload: JsonBody<RegisterRequest>,
) -> Result<status::Custom<Json<DataResponse<RegisteredUser>>>, AuthRejection> {
    let user = service
        .register(payload.into_inner().into(), Utc::now())
        .await
        .map_err(respond_error)?;

    Ok(status::Custom(
        Status::Created,
        Json(DataResponse { data: user.into() }),
    ))
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    _limit: CredentialRateLimit,
    service: &State<AuthService>,
    cookies: &CookieJar<'_>,
    payload: JsonBody<LoginRequest>,
) -> AuthRouteResult<DataResponse<LoginResponse>> {
    let outcome = service
        .login(&payload.email, &payload.password, Utc::now())
        .await
        .map_err(respond_error)?;

    let config = service.config();
    set_token_cookie(
        cookies,
        config,
        &config.access_cookie_name,
        outcome.tokens.access.token.clone(),
        ACCESS_COOKIE_PATH,
        config.access_token_ttl_secs,
    );
    set_token_cookie(
        cookies,
        config,
        &config.refresh_cookie_name,
        outcome.tokens.refresh.token.clone(),
        REFRESH_COOKIE_PATH,
        config.refresh_token_ttl_secs,
    );

    Ok(Json(DataResponse {
        data: LoginResponse::from(outcome),
    }))
}

/// Tokens are stateless; logging out only clears the client's cookies.
#[openapi(tag = "Auth")]
#[post("/auth/logout")]
pub async fn logout(
    _limit: GeneralRateLimit,
    service: &State<AuthService>,
    cookies: &CookieJar<'_>,
) -> Json<MessageResponse> {
    clear_auth_cookies(cookies, service.config());
    Json(MessageResponse::new("logged out"))
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh-token", data = "<payload>")]
pub async fn refresh_token(
    _limit: GeneralRateLimit,
    service: &State<AuthService>,
    cookies: &CookieJar<'_>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> AuthRouteResult<DataResponse<RefreshResponse>> {
    let config = service.config();
    let token = cookies
        .get(&config.refresh_cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| payload.and_then(|body| body.into_inner().refresh_token))
        .ok_or_else(|| respond_error(AuthError::RefreshTokenMissing))?;

    let access = service.refresh(&token).await.map_err(respond_error)?;

    set_token_cookie(
        cookies,
        config,
        &config.access_cookie_name,
        access.token.clone(),
        ACCESS_COOKIE_PATH,
        config.access_token_ttl_secs,
    );

    Ok(Json(DataResponse {
        data: RefreshResponse {
            access_token: access.token,
            expires_at: access.expires_at,
        },
    }))
}

/// Always succeeds so the response does not reveal whether the email is registered.
#[openapi(tag = "Auth")]
#[post("/auth/forgot-password", data = "<payload>")]
pub async fn forgot_password(
    _limit: CredentialRateLimit,
    service: &State<AuthService>,
    payload: JsonBody<ForgotPasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    service
        .forgot_password(&payload.email, Utc::now())
        .await
        .map_err(respond_error)?;
    Ok(Json(MessageResponse::new(
        "if this email is registered, a reset code has been sent",
    )))
}

#[openapi(tag = "Auth")]
#[post("/auth/reset-password", data = "<payload>")]
pub async fn reset_password(
    _limit: CredentialRateLimit,
    service: &State<AuthService>,
    payload: JsonBody<ResetPasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    service
        .reset_password(&payload.code, &payload.new_password, Utc::now())
        .await
        .map_err(respond_error)?;
    Ok(Json(MessageResponse::new("password has been reset")))
}

#[openapi(tag = "Auth")]
#[post("/auth/verify-email", data = "<payload>")]
pub async fn verify_email(
    _limit: GeneralRateLimit,
    service: &State<AuthService>,
    payload: JsonBody<VerifyEmailRequest>,
) -> AuthRouteResult<DataResponse<VerifiedEmail>> {
    let user = service
        .verify_email(&payload.code, Utc::now())
        .await
        .map_err(respond_error)?;
    Ok(Json(DataResponse {
        data: VerifiedEmail {
            email: user.email,
            email_verified: user.email_verified,
        },
    }))
}

#[openapi(tag = "Auth")]
#[post("/auth/change-password", data = "<payload>")]
pub async fn change_password(
    _limit: GeneralRateLimit,
    service: &State<AuthService>,
    user: AuthUser,
    payload: JsonBody<ChangePasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    service
        .change_password(user.id, &payload.current_password, &payload.new_password)
        .await
        .map_err(respond_error)?;
    Ok(Json(MessageResponse::new("password changed")))
}

#[openapi(tag = "Auth")]
#[get("/auth/profile")]
pub async fn profile(
    _limit: GeneralRateLimit,
    service: &State<AuthService>,
    user: AuthUser,
) -> AuthRouteResult<DataResponse<ProfileResponse>> {
    let profile = service.profile(user.id).await.map_err(respond_error)?;
    Ok(Json(DataResponse {
        data: profile.into(),
    }))
}

pub fn respond_error(err: AuthError) -> AuthRejection {
    if err.is_internal() {
        log::error!("auth request failed: {err}");
    }
    status::Custom(err.status(), Json(AuthErrorResponse::from(&err)))
}

fn set_token_cookie(
    cookies: &CookieJar<'_>,
    config: &AuthConfig,
    name: &str,
    value: String,
    path: &'static str,
    max_age_secs: i64,
) {
    let mut cookie = Cookie::build((name.to_string(), value))
        .path(path)
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(config.cookie_secure)
        .max_age(TimeDuration::seconds(max_age_secs))
        .build();

    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookies.add(cookie);
}

fn clear_auth_cookies(cookies: &CookieJar<'_>, config: &AuthConfig) {
    for (name, path) in [
        (&config.access_cookie_name, ACCESS_COOKIE_PATH),
        (&config.refresh_cookie_name, REFRESH_COOKIE_PATH),
    ] {
        let mut cookie = Cookie::build((name.clone(), String::new()))
            .path(path)
            .removal()
            .build();

        if let Some(domain) = &config.cookie_domain {
            cookie.set_domain(domain.clone());
        }
        cookies.add(cookie);
    }
}
