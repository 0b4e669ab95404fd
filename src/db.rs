use rocket_db_pools::{Database, sqlx};

/// Primary Postgres pool, configured under `databases.rbac_db` in `Rocket.toml`.
#[derive(Database)]
#[database("rbac_db")]
pub struct RbacDb(sqlx::PgPool);
