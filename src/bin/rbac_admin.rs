use std::io::{self, Write};

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use rbac_api::auth::passwords::PasswordService;
use rbac_api::models::NewUser;
use rbac_api::seed_data::{DEFAULT_ROLE_NAME, seed_defaults};
use rbac_api::store::postgres::run_migrations;
use rbac_api::store::{PgStore, RbacStore};
use rbac_api::validation::{MAX_NAME_LEN, Validator, normalize_email};

#[derive(Parser, Debug)]
#[command(name = "rbac-admin", about = "Administrative tasks for the RBAC API database")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the default permissions and roles. Safe to run repeatedly.
    Seed,
    /// Create an active, verified user account.
    CreateUser {
        /// Email address for the account (case insensitive).
        #[arg(long)]
        email: String,

        /// Plaintext password to hash and store for this user.
        #[arg(long)]
        password: String,

        #[arg(long, default_value = "Admin")]
        first_name: String,

        #[arg(long, default_value = "User")]
        last_name: String,

        /// Role names to assign; repeat the flag for several roles.
        #[arg(long = "role", default_value = DEFAULT_ROLE_NAME)]
        roles: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    match cli.command {
        Command::Seed => {
            let report = seed_defaults(&store).await?;
            println!(
                "Seeded {} permissions and {} roles",
                report.permissions_created, report.roles_created
            );
        }
        Command::CreateUser {
            email,
            password,
            first_name,
            last_name,
            roles,
        } => {
            let email = normalize_email(&email);
            let first_name = first_name.trim().to_string();
            let last_name = last_name.trim().to_string();

            let mut validator = Validator::new();
            validator
                .email("email", &email)
                .strong_password("password", &password)
                .length("firstName", &first_name, 1, MAX_NAME_LEN)
                .length("lastName", &last_name, 1, MAX_NAME_LEN);
            if let Err(errors) = validator.finish() {
                for error in errors {
                    writeln!(io::stderr(), "error: {}: {}", error.field, error.message)?;
                }
                std::process::exit(1);
            }

            if store.find_user_by_email(&email).await?.is_some() {
                writeln!(
                    io::stderr(),
                    "error: a user with email '{email}' already exists."
                )?;
                std::process::exit(1);
            }

            let mut role_ids = Vec::with_capacity(roles.len());
            for name in &roles {
                match store.find_role_by_name(name.trim()).await? {
                    Some(role) => role_ids.push(role.id),
                    None => {
                        writeln!(
                            io::stderr(),
                            "error: unknown role '{name}'. Run `rbac-admin seed` first?"
                        )?;
                        std::process::exit(1);
                    }
                }
            }

            let password_service = PasswordService::new().map_err(|err| {
                io::Error::new(io::ErrorKind::Other, format!("argon2 init failed: {err}"))
            })?;
            let password_hash = password_service.hash_password(&password).map_err(|err| {
                io::Error::new(io::ErrorKind::Other, format!("password hash failed: {err}"))
            })?;

            let user = store
                .create_user(NewUser {
                    email,
                    password_hash,
                    first_name,
                    last_name,
                    role_ids,
                    is_active: true,
                    email_verified: true,
                    verification_code: None,
                })
                .await?;

            println!(
                "Created user '{}' with id {} and roles {}",
                user.email,
                user.id,
                roles.join(", ")
            );
        }
    }

    store.close().await;
    Ok(())
}
