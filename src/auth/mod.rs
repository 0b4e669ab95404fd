//! Authentication and authorization: configuration, credential handling, lockout, token
//! minting, one-time codes, permission aggregation, per-IP rate limits, Rocket request
//! guards and the `/auth` route handlers.

pub mod codes;
pub mod config;
pub mod error;
pub mod guards;
pub mod jwt;
pub mod lockout;
pub mod passwords;
pub mod permissions;
pub mod rate_limit;
pub mod responses;
pub mod routes;
pub mod service;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{AuthUser, Require, RequiredPermission};
pub use jwt::JwtService;
pub use passwords::{HashedPassword, PasswordService};
pub use permissions::EffectivePermissions;
pub use service::AuthService;
