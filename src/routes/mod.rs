//! HTTP route handlers grouped by resource.
//!
//! Each submodule exposes typed Rocket handlers annotated with `#[openapi]` so
//! `rocket_okapi` can derive an OpenAPI document automatically. The `/auth` handlers
//! live in [`crate::auth::routes`].

pub mod body;
pub mod catchers;
pub mod health;
pub(crate) mod helpers;
pub mod params;
pub mod permissions;
pub mod roles;
pub mod users;
