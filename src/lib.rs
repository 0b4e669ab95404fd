pub mod auth;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod seed_data;
pub mod store;
pub mod validation;

use crate::auth::config::env_flag;
use crate::auth::rate_limit::AuthRateLimits;
use crate::auth::{AuthConfig, AuthService, PasswordService};
use crate::db::RbacDb;
use crate::mailer::LogMailer;
use crate::request_logger::RequestLogger;
use crate::store::{PgStore, SharedStore};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every API route plus the generated `openapi.json`, relative to the `/api` mount point.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        routes::health::health_check,
        // Auth
        auth::routes::register,
        auth::routes::login,
        auth::routes::logout,
        auth::routes::refresh_token,
        auth::routes::forgot_password,
        auth::routes::reset_password,
        auth::routes::verify_email,
        auth::routes::change_password,
        auth::routes::profile,
        // Users
        routes::users::list_users,
        routes::users::get_user,
        routes::users::create_user,
        routes::users::update_user,
        routes::users::delete_user,
        routes::users::toggle_user_status,
        routes::users::assign_roles,
        // Roles
        routes::roles::list_roles,
        routes::roles::get_role,
        routes::roles::create_role,
        routes::roles::update_role,
        routes::roles::delete_role,
        routes::roles::attach_permissions,
        // Permissions
        routes::permissions::list_permissions,
        routes::permissions::get_permission,
        routes::permissions::create_permission,
        routes::permissions::update_permission,
        routes::permissions::delete_permission,
    ]
}

fn allowed_origins() -> AllowedOrigins {
    match std::env::var("RBAC_ALLOWED_ORIGINS") {
        Ok(value) if !value.trim().is_empty() => {
            let origins: Vec<String> = value
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
            AllowedOrigins::some_exact(&origins)
        }
        _ => AllowedOrigins::all(),
    }
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(allowed_origins())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors();

    let rocket = rocket::build()
        .attach(RequestLogger)
        .attach(RbacDb::init());

    let rocket = match cors {
        Ok(cors) => rocket.attach(cors),
        Err(err) => {
            log::error!("invalid CORS configuration, serving without CORS: {}", err);
            rocket
        }
    };

    rocket
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match RbacDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match store::postgres::run_migrations(&pool).await {
                            Ok(_) => Ok(rocket),
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        // Build the store and auth service over the pool and hand them to Rocket state
        .attach(AdHoc::try_on_ignite(
            "Manage Store and Auth Service",
            |rocket| async move {
                let pool = match RbacDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for store");
                        return Err(rocket);
                    }
                };

                let config = match AuthConfig::from_env() {
                    Ok(config) => config,
                    Err(err) => {
                        log::error!("invalid auth configuration: {}", err);
                        return Err(rocket);
                    }
                };
                let passwords = match PasswordService::new() {
                    Ok(passwords) => passwords,
                    Err(err) => {
                        log::error!("failed to initialize password hashing: {}", err);
                        return Err(rocket);
                    }
                };

                let limits = AuthRateLimits::from_config(&config);
                let store: SharedStore = Arc::new(PgStore::new(pool));
                match AuthService::new(config, store.clone(), passwords, Arc::new(LogMailer)) {
                    Ok(service) => Ok(rocket.manage(store).manage(service).manage(limits)),
                    Err(err) => {
                        log::error!("failed to initialize auth service: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite("Seed Defaults", |rocket| async move {
            if !env_flag("RBAC_SEED_DEFAULTS", true) {
                return Ok(rocket);
            }
            let Some(store) = rocket.state::<SharedStore>() else {
                log::error!("store not available for seeding");
                return Err(rocket);
            };
            let seeded = seed_data::seed_defaults(store.as_ref()).await;
            match seeded {
                Ok(report) => {
                    log::info!(
                        "default access control data ready ({} permissions, {} roles created)",
                        report.permissions_created,
                        report.roles_created
                    );
                    Ok(rocket)
                }
                Err(err) => {
                    log::error!("seeding default roles and permissions failed: {}", err);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::on_shutdown("Close Store", |rocket| {
            Box::pin(async move {
                if let Some(store) = rocket.state::<SharedStore>() {
                    store.close().await;
                }
            })
        }))
        .register("/", routes::catchers::all())
        .mount("/api", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use uuid::Uuid;

    use crate::auth::rate_limit::AuthRateLimits;
    use crate::auth::{AuthConfig, AuthService, PasswordService};
    use crate::mailer::{MailError, Mailer};
    use crate::models::{NewUser, UserWithRoles};
    use crate::request_logger::RequestLogger;
    use crate::seed_data::seed_defaults;
    use crate::store::{MemoryStore, RbacStore, SharedStore, StoreError};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Deterministic auth settings: distinct secrets, insecure cookies, default lockout.
    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            issuer: "rbac-api-test".into(),
            audience: "rbac-admin-test".into(),
            access_token_secret: "test-access-secret".into(),
            refresh_token_secret: "test-refresh-secret".into(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_secs: 7 * 24 * 60 * 60,
            access_cookie_name: "accessToken".into(),
            refresh_cookie_name: "refreshToken".into(),
            cookie_domain: None,
            cookie_secure: false,
            max_login_attempts: 5,
            lock_duration_secs: 2 * 60 * 60,
            one_time_code_ttl_secs: 15 * 60,
            // Shared local client address; tests that exercise limiting lower these.
            credential_rate_limit: 10_000,
            general_rate_limit: 10_000,
            rate_limit_window_secs: 15 * 60,
        }
    }

    /// Argon2 with minimal cost so tests do not spend seconds hashing.
    pub fn fast_password_service() -> PasswordService {
        PasswordService::with_params(1024, 1, 1).expect("valid argon2 parameters")
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CodeKind {
        Verification,
        PasswordReset,
    }

    #[derive(Debug, Clone)]
    pub struct SentCode {
        pub email: String,
        pub kind: CodeKind,
        pub code: String,
    }

    /// Mailer that keeps every code it was asked to send.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<SentCode>>,
    }

    impl RecordingMailer {
        pub fn sent(&self) -> Vec<SentCode> {
            self.sent.lock().clone()
        }

        pub fn last_verification_code(&self, email: &str) -> Option<String> {
            self.last_code(email, CodeKind::Verification)
        }

        pub fn last_reset_code(&self, email: &str) -> Option<String> {
            self.last_code(email, CodeKind::PasswordReset)
        }

        fn last_code(&self, email: &str, kind: CodeKind) -> Option<String> {
            self.sent
                .lock()
                .iter()
                .rev()
                .find(|sent| sent.email == email && sent.kind == kind)
                .map(|sent| sent.code.clone())
        }

        fn record(&self, email: &str, kind: CodeKind, code: &str) {
            self.sent.lock().push(SentCode {
                email: email.to_string(),
                kind,
                code: code.to_string(),
            });
        }
    }

    #[rocket::async_trait]
    impl Mailer for RecordingMailer {
        async fn send_verification_code(
            &self,
            email: &str,
            _first_name: &str,
            code: &str,
        ) -> Result<(), MailError> {
            self.record(email, CodeKind::Verification, code);
            Ok(())
        }

        async fn send_password_reset_code(
            &self,
            email: &str,
            _first_name: &str,
            code: &str,
        ) -> Result<(), MailError> {
            self.record(email, CodeKind::PasswordReset, code);
            Ok(())
        }
    }

    /// In-memory store holding the default permissions and roles.
    pub async fn seeded_memory_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        seed_defaults(store.as_ref())
            .await
            .expect("seed in-memory store");
        store
    }

    /// Auth service over a seeded in-memory store with a recording mailer.
    pub async fn seeded_auth_service() -> (AuthService, Arc<RecordingMailer>, Arc<MemoryStore>) {
        let store = seeded_memory_store().await;
        let mailer = Arc::new(RecordingMailer::default());
        let service = AuthService::new(
            test_auth_config(),
            store.clone(),
            fast_password_service(),
            mailer.clone(),
        )
        .expect("auth service");
        (service, mailer, store)
    }

    /// Convenience helpers for seeding users through any store backend.
    pub struct TestFixtures<'a> {
        store: &'a dyn RbacStore,
        passwords: PasswordService,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided store.
        pub fn new(store: &'a dyn RbacStore) -> Self {
            Self {
                store,
                passwords: fast_password_service(),
            }
        }

        /// Look up a role id by name.
        pub async fn role_id(&self, name: &str) -> Result<Uuid, StoreError> {
            self.store
                .find_role_by_name(name)
                .await?
                .map(|role| role.id)
                .ok_or(StoreError::NotFound("role"))
        }

        /// Insert an active, verified user holding the named roles.
        pub async fn insert_user(
            &self,
            email: &str,
            password: &str,
            roles: &[&str],
        ) -> Result<UserWithRoles, StoreError> {
            let mut role_ids = Vec::with_capacity(roles.len());
            for name in roles {
                role_ids.push(self.role_id(name).await?);
            }

            let password_hash = self
                .passwords
                .hash_password(password)
                .expect("hash fixture password");
            let user = self
                .store
                .create_user(NewUser {
                    email: email.to_string(),
                    password_hash,
                    first_name: "Test".to_string(),
                    last_name: "User".to_string(),
                    role_ids,
                    is_active: true,
                    email_verified: true,
                    verification_code: None,
                })
                .await?;

            self.store
                .load_user_with_roles(user.id)
                .await?
                .ok_or(StoreError::NotFound("user"))
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        use crate::auth::config::env_flag;
        use crate::store::postgres::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set and RBAC_TEST_CONTAINERS disabled")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// A freshly migrated database owned by one test.
        ///
        /// Only [`TestDatabase::close`] removes it; a test that panics first leaves it
        /// behind on a shared server.
        pub struct TestDatabase {
            pool: PgPool,
            server: PgConnectOptions,
            name: String,
            _container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Connect to `TEST_DATABASE_URL`, or start a Postgres container when
            /// `RBAC_TEST_CONTAINERS=1`.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::create(url.parse()?, None).await;
                }
                if !env_flag("RBAC_TEST_CONTAINERS", false) {
                    return Err(TestDatabaseError::MissingUrl);
                }

                let container = Postgres::default().start().await?;
                let server = PgConnectOptions::new()
                    .host(&container.get_host().await?.to_string())
                    .port(container.get_host_port_ipv4(5432).await?)
                    .username("postgres")
                    .password("postgres");
                Self::create(server, Some(container)).await
            }

            async fn create(
                server: PgConnectOptions,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let server = server.database("postgres").log_statements(LevelFilter::Off);
                let name = format!("rbac_test_{}", Uuid::new_v4().simple());
                run_on_server(&server, &format!("CREATE DATABASE \"{name}\"")).await?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(server.clone().database(&name))
                    .await?;
                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool,
                    server,
                    name,
                    _container: container,
                })
            }

            pub fn pool(&self) -> PgPool {
                self.pool.clone()
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            /// Connection options for the server's `postgres` maintenance database.
            pub fn server_options(&self) -> PgConnectOptions {
                self.server.clone()
            }

            /// Close every connection, then drop the database.
            pub async fn close(self) -> Result<(), TestDatabaseError> {
                self.pool.close().await;
                let statement = format!("DROP DATABASE IF EXISTS \"{}\"", self.name);
                run_on_server(&self.server, &statement).await
            }
        }

        async fn run_on_server(
            server: &PgConnectOptions,
            statement: &str,
        ) -> Result<(), TestDatabaseError> {
            let admin = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(server.clone())
                .await?;
            let result = sqlx::query(statement).execute(&admin).await;
            admin.close().await;
            result?;
            Ok(())
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    ///
    /// Without an explicit store the instance runs over an empty [`MemoryStore`].
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        store: Option<SharedStore>,
        mailer: Option<Arc<RecordingMailer>>,
        config: AuthConfig,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                store: None,
                mailer: None,
                config: test_auth_config(),
            }
        }

        /// Mount routes under `/api`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api".to_string(), routes));
            self
        }

        pub fn with_store(mut self, store: SharedStore) -> Self {
            self.store = Some(store);
            self
        }

        pub fn with_mailer(mut self, mailer: Arc<RecordingMailer>) -> Self {
            self.mailer = Some(mailer);
            self
        }

        pub fn with_auth_config(mut self, config: AuthConfig) -> Self {
            self.config = config;
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .attach(RequestLogger)
                .register("/", crate::routes::catchers::all());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            let store = self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new()) as SharedStore);
            let mailer = self.mailer.unwrap_or_default();
            let limits = AuthRateLimits::from_config(&self.config);
            let service = AuthService::new(
                self.config,
                store.clone(),
                fast_password_service(),
                mailer,
            )
            .expect("test auth service");

            rocket.manage(store).manage(service).manage(limits)
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
