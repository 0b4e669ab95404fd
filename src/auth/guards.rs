//! Request guards for authentication and permission checks.
//!
//! A failing guard records its error body in the request-local cache; the default
//! catcher renders it so every rejection reaches the client as JSON.

use std::marker::PhantomData;
use std::ops::Deref;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, State};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use uuid::Uuid;

use crate::auth::permissions::EffectivePermissions;
use crate::auth::responses::AuthErrorResponse;
use crate::auth::service::AuthService;
use crate::auth::{AuthError, AuthResult};

const BEARER_SCHEME: &str = "BearerAuth";

/// Error body left behind by a rejecting guard.
#[derive(Debug, Clone, Default)]
pub struct GuardRejection(pub Option<AuthErrorResponse>);

/// Authenticated caller id, read by the request logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerId(pub Option<Uuid>);

type CachedAuth = Result<AuthUser, (Status, AuthErrorResponse)>;

/// The authenticated caller with roles and permissions resolved for this request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: EffectivePermissions,
}

impl AuthUser {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_self(&self, user_id: Uuid) -> bool {
        self.id == user_id
    }

    pub fn require(&self, permission: &str) -> AuthResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                required: vec![permission.to_string()],
            })
        }
    }

    /// Pass if the caller holds at least one of `permissions`.
    pub fn require_any(&self, permissions: &[&str]) -> AuthResult<()> {
        if self.permissions.contains_any(permissions) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                required: permissions.iter().map(|p| p.to_string()).collect(),
            })
        }
    }

    /// Pass only if the caller holds every one of `permissions`. The rejection names the
    /// missing ones.
    pub fn require_all(&self, permissions: &[&str]) -> AuthResult<()> {
        let missing = self.permissions.missing(permissions);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Forbidden { required: missing })
        }
    }

    pub fn require_owner_or(&self, owner_id: Uuid, fallback: &str) -> AuthResult<()> {
        if self.is_self(owner_id) || self.has_permission(fallback) {
            Ok(())
        } else {
            Err(AuthError::NotOwner)
        }
    }

    pub fn require_role(&self, role: &str) -> AuthResult<()> {
        if self.roles.iter().any(|name| name == role) {
            Ok(())
        } else {
            Err(AuthError::MissingRole {
                required: role.to_string(),
            })
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthErrorResponse;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cached: &CachedAuth = request
            .local_cache_async(async {
                authenticate(request).await.map_err(|err| {
                    if err.is_internal() {
                        log::error!("authentication failed: {err}");
                    } else {
                        log::info!("rejected {} {}: {err}", request.method(), request.uri().path());
                    }
                    (err.status(), AuthErrorResponse::from(&err))
                })
            })
            .await;

        match cached {
            Ok(user) => {
                request.local_cache(|| CallerId(Some(user.id)));
                Outcome::Success(user.clone())
            }
            Err((status, body)) => reject(request, *status, body.clone()),
        }
    }
}

async fn authenticate(request: &Request<'_>) -> AuthResult<AuthUser> {
    let service = request
        .guard::<&State<AuthService>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthService missing from state".into()))?;

    let token = access_token_from_request(request, &service.config().access_cookie_name)
        .ok_or(AuthError::TokenMissing)?;

    let identity = service.resolve_identity(&token).await?;
    Ok(AuthUser {
        id: identity.user.user.id,
        email: identity.user.user.email.clone(),
        roles: identity.user.role_names(),
        permissions: identity.permissions,
    })
}

/// Bearer header first, then the access cookie.
fn access_token_from_request(request: &Request<'_>, cookie_name: &str) -> Option<String> {
    if let Some(header) = request.headers().get_one("Authorization") {
        if let Some((scheme, token)) = header.split_once(' ') {
            let token = token.trim();
            if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    request
        .cookies()
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn reject<T>(
    request: &Request<'_>,
    status: Status,
    body: AuthErrorResponse,
) -> Outcome<T, AuthErrorResponse> {
    request.local_cache(|| GuardRejection(Some(body.clone())));
    Outcome::Error((status, body))
}

/// Marker for a permission checked by [`Require`].
pub trait RequiredPermission: Send + Sync + 'static {
    const NAME: &'static str;
}

macro_rules! required_permission {
    ($($ty:ident => $name:literal),+ $(,)?) => {
        $(
            #[doc = concat!("Requires the `", $name, "` permission.")]
            #[derive(Debug, Clone, Copy)]
            pub struct $ty;

            impl RequiredPermission for $ty {
                const NAME: &'static str = $name;
            }
        )+
    };
}

required_permission! {
    UserRead => "user.read",
    UserCreate => "user.create",
    UserUpdate => "user.update",
    UserDelete => "user.delete",
    RoleRead => "role.read",
    RoleCreate => "role.create",
    RoleUpdate => "role.update",
    RoleDelete => "role.delete",
    PermissionRead => "permission.read",
    PermissionCreate => "permission.create",
    PermissionUpdate => "permission.update",
    PermissionDelete => "permission.delete",
}

/// An authenticated caller holding permission `P`.
#[derive(Debug, Clone)]
pub struct Require<P: RequiredPermission> {
    user: AuthUser,
    _permission: PhantomData<P>,
}

impl<P: RequiredPermission> Require<P> {
    pub fn into_user(self) -> AuthUser {
        self.user
    }
}

impl<P: RequiredPermission> Deref for Require<P> {
    type Target = AuthUser;

    fn deref(&self) -> &AuthUser {
        &self.user
    }
}

#[rocket::async_trait]
impl<'r, P: RequiredPermission> FromRequest<'r> for Require<P> {
    type Error = AuthErrorResponse;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let user = match AuthUser::from_request(request).await {
            Outcome::Success(user) => user,
            Outcome::Error(err) => return Outcome::Error(err),
            Outcome::Forward(status) => return Outcome::Forward(status),
        };

        match user.require(P::NAME) {
            Ok(()) => Outcome::Success(Require {
                user,
                _permission: PhantomData,
            }),
            Err(err) => {
                log::info!("user {} lacks {}", user.id, P::NAME);
                reject(request, err.status(), AuthErrorResponse::from(&err))
            }
        }
    }
}

fn bearer_security() -> RequestHeaderInput {
    let scheme = SecurityScheme {
        description: Some("Access token from `POST /api/auth/login`, sent as a bearer token or the access cookie.".into()),
        data: SecuritySchemeData::Http {
            scheme: "bearer".into(),
            bearer_format: Some("JWT".into()),
        },
        extensions: Object::default(),
    };
    let mut requirement = SecurityRequirement::new();
    requirement.insert(BEARER_SCHEME.into(), Vec::new());
    RequestHeaderInput::Security(BEARER_SCHEME.into(), scheme, requirement)
}

impl<'r> OpenApiFromRequest<'r> for AuthUser {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

impl<'r, P: RequiredPermission> OpenApiFromRequest<'r> for Require<P> {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PermissionName;

    fn caller(permissions: &[&str]) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            email: "caller@example.com".into(),
            roles: vec!["Manager".into()],
            permissions: permissions.iter().map(|p| PermissionName::from(*p)).collect(),
        }
    }

    #[test]
    fn any_and_all_checks() {
        let user = caller(&["user.read", "user.update"]);
        assert!(user.require_any(&["user.delete", "user.read"]).is_ok());
        assert!(user.require_all(&["user.read", "user.update"]).is_ok());

        match user.require_all(&["user.read", "user.delete", "role.read"]) {
            Err(AuthError::Forbidden { required }) => {
                assert_eq!(required, vec!["user.delete", "role.read"]);
            }
            other => panic!("expected forbidden, got {other:?}"),
        }

        match user.require_any(&["role.read", "role.update"]) {
            Err(AuthError::Forbidden { required }) => {
                assert_eq!(required, vec!["role.read", "role.update"]);
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[test]
    fn owner_or_fallback_permission() {
        let user = caller(&[]);
        assert!(user.require_owner_or(user.id, "user.read").is_ok());
        assert!(matches!(
            user.require_owner_or(Uuid::new_v4(), "user.read"),
            Err(AuthError::NotOwner)
        ));

        let reader = caller(&["user.read"]);
        assert!(reader.require_owner_or(Uuid::new_v4(), "user.read").is_ok());
    }

    #[test]
    fn role_gate() {
        let user = caller(&[]);
        assert!(user.require_role("Manager").is_ok());
        assert!(matches!(
            user.require_role("Super Admin"),
            Err(AuthError::MissingRole { .. })
        ));
    }

    #[test]
    fn marker_types_name_their_permission() {
        assert_eq!(UserDelete::NAME, "user.delete");
        assert_eq!(PermissionRead::NAME, "permission.read");
    }
}
