use std::str::FromStr;

use chrono::Duration;

use crate::auth::lockout::LockoutPolicy;
use crate::auth::{AuthError, AuthResult};

const INSECURE_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const INSECURE_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub max_login_attempts: i32,
    pub lock_duration_secs: i64,
    pub one_time_code_ttl_secs: i64,
    /// Requests per client IP and window on register, login, forgot and reset password.
    pub credential_rate_limit: u32,
    /// Requests per client IP and window on the remaining `/auth` routes.
    pub general_rate_limit: u32,
    pub rate_limit_window_secs: u64,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer = std::env::var("RBAC_JWT_ISSUER").unwrap_or_else(|_| "rbac-api".into());
        let audience =
            std::env::var("RBAC_JWT_AUDIENCE").unwrap_or_else(|_| "rbac-admin-client".into());
        let allow_insecure = env_flag("RBAC_ALLOW_INSECURE_DEFAULTS", false);
        let access_token_secret =
            required_secret("RBAC_JWT_ACCESS_SECRET", INSECURE_ACCESS_SECRET, allow_insecure)?;
        let refresh_token_secret =
            required_secret("RBAC_JWT_REFRESH_SECRET", INSECURE_REFRESH_SECRET, allow_insecure)?;
        if access_token_secret == refresh_token_secret {
            log::warn!("access and refresh tokens share a signing secret; configure distinct keys");
        }
        let access_token_ttl_secs = env_parse("RBAC_ACCESS_TOKEN_TTL_SECS", 15 * 60);
        let refresh_token_ttl_secs = env_parse("RBAC_REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60);
        let access_cookie_name = std::env::var("RBAC_ACCESS_COOKIE_NAME")
            .unwrap_or_else(|_| "accessToken".into());
        let refresh_cookie_name = std::env::var("RBAC_REFRESH_COOKIE_NAME")
            .unwrap_or_else(|_| "refreshToken".into());
        let cookie_domain = std::env::var("RBAC_COOKIE_DOMAIN").ok();
        let cookie_secure = env_flag("RBAC_COOKIE_SECURE", true);
        let max_login_attempts = env_parse("RBAC_MAX_LOGIN_ATTEMPTS", 5);
        let lock_duration_secs = env_parse("RBAC_LOCK_DURATION_SECS", 2 * 60 * 60);
        let one_time_code_ttl_secs = env_parse("RBAC_ONE_TIME_CODE_TTL_SECS", 15 * 60);
        let credential_rate_limit = env_parse("RBAC_AUTH_RATE_LIMIT_MAX", 5);
        let general_rate_limit = env_parse("RBAC_GENERAL_RATE_LIMIT_MAX", 100);
        let rate_limit_window_secs = env_parse("RBAC_RATE_LIMIT_WINDOW_SECS", 15 * 60);

        if max_login_attempts < 1 {
            return Err(AuthError::Config(
                "RBAC_MAX_LOGIN_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            issuer,
            audience,
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            access_cookie_name,
            refresh_cookie_name,
            cookie_domain,
            cookie_secure,
            max_login_attempts,
            lock_duration_secs,
            one_time_code_ttl_secs,
            credential_rate_limit,
            general_rate_limit,
            rate_limit_window_secs,
        })
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(
            self.max_login_attempts,
            Duration::seconds(self.lock_duration_secs),
        )
    }

    pub fn one_time_code_ttl(&self) -> Duration {
        Duration::seconds(self.one_time_code_ttl_secs)
    }
}

fn required_secret(key: &str, fallback: &str, allow_insecure: bool) -> AuthResult<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if allow_insecure => {
            log::warn!("{key} not set; using an insecure development secret");
            Ok(fallback.to_string())
        }
        _ => Err(AuthError::Config(format!("{key} is required"))),
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}
