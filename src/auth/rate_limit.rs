//! Fixed-window request limits per client IP for the `/auth` routes.
//!
//! Credential endpoints (register, login, forgot and reset password) share one tight
//! budget; the remaining auth routes share a looser one. A route opts in by taking a
//! [`RateLimited`] guard.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, State};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};

use crate::auth::guards::reject;
use crate::auth::responses::AuthErrorResponse;
use crate::auth::{AuthConfig, AuthError};

/// Map size at which expired windows are swept before inserting a new client.
const PRUNE_THRESHOLD: usize = 10_000;
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    started: Instant,
}

/// Counts requests per client key inside a fixed window.
#[derive(Debug)]
pub struct AuthRateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<String, WindowEntry>>,
}

impl AuthRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Admit one request from `client`, or return how long until its window reopens.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let window = self.config.window;
        let mut entries = self.entries.write();

        if entries.len() >= PRUNE_THRESHOLD && !entries.contains_key(client) {
            entries.retain(|_, entry| now.saturating_duration_since(entry.started) < window);
        }

        let entry = entries.entry(client.to_string()).or_insert(WindowEntry {
            count: 0,
            started: now,
        });

        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.config.max_requests {
            return Err(window.saturating_sub(now.saturating_duration_since(entry.started)));
        }

        entry.count += 1;
        Ok(())
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.read().len()
    }
}

/// The two limiters managed as Rocket state.
#[derive(Debug)]
pub struct AuthRateLimits {
    pub credentials: AuthRateLimiter,
    pub general: AuthRateLimiter,
}

impl AuthRateLimits {
    pub fn from_config(config: &AuthConfig) -> Self {
        let window = Duration::from_secs(config.rate_limit_window_secs);
        Self {
            credentials: AuthRateLimiter::new(RateLimitConfig {
                max_requests: config.credential_rate_limit,
                window,
            }),
            general: AuthRateLimiter::new(RateLimitConfig {
                max_requests: config.general_rate_limit,
                window,
            }),
        }
    }
}

/// Selects which limiter a [`RateLimited`] guard draws from.
pub trait RateLimitTier: Send + Sync + 'static {
    const NAME: &'static str;

    fn limiter(limits: &AuthRateLimits) -> &AuthRateLimiter;
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialTier;

impl RateLimitTier for CredentialTier {
    const NAME: &'static str = "credentials";

    fn limiter(limits: &AuthRateLimits) -> &AuthRateLimiter {
        &limits.credentials
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneralTier;

impl RateLimitTier for GeneralTier {
    const NAME: &'static str = "general";

    fn limiter(limits: &AuthRateLimits) -> &AuthRateLimiter {
        &limits.general
    }
}

/// Admits the request if the client IP still has budget in tier `T`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimited<T: RateLimitTier>(PhantomData<T>);

pub type CredentialRateLimit = RateLimited<CredentialTier>;
pub type GeneralRateLimit = RateLimited<GeneralTier>;

#[rocket::async_trait]
impl<'r, T: RateLimitTier> FromRequest<'r> for RateLimited<T> {
    type Error = AuthErrorResponse;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let limits = match request.guard::<&State<AuthRateLimits>>().await.succeeded() {
            Some(limits) => limits,
            None => {
                let err = AuthError::Config("AuthRateLimits missing from state".into());
                log::error!("{err}");
                return reject(request, err.status(), AuthErrorResponse::from(&err));
            }
        };

        let client = request
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        match T::limiter(limits).check(&client) {
            Ok(()) => Outcome::Success(RateLimited(PhantomData)),
            Err(retry_after) => {
                log::warn!(
                    "{} rate limit exceeded for {client} on {}",
                    T::NAME,
                    request.uri().path()
                );
                let err = AuthError::RateLimited {
                    retry_after_secs: retry_after.as_secs().max(1),
                };
                reject(request, err.status(), AuthErrorResponse::from(&err))
            }
        }
    }
}

impl<'r, T: RateLimitTier> OpenApiFromRequest<'r> for RateLimited<T> {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
