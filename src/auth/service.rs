//! Authentication flows: registration, login with lockout, token refresh, one-time code
//! flows and identity resolution for request guards.
//!
//! Every flow that depends on the clock takes `now` explicitly so lock expiry and code
//! expiry can be exercised without sleeping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::codes::{NUMERIC_CODE_LEN, OneTimeCode, digest_code};
use crate::auth::jwt::{JwtService, SignedToken, TokenPair};
use crate::auth::lockout::LockoutPolicy;
use crate::auth::permissions::EffectivePermissions;
use crate::auth::{AuthConfig, AuthError, AuthResult, HashedPassword, PasswordService};
use crate::mailer::Mailer;
use crate::models::{NewUser, User, UserWithRoles};
use crate::seed_data::DEFAULT_ROLE_NAME;
use crate::store::{SharedStore, StoreError};
use crate::validation::{MAX_NAME_LEN, Validator, normalize_email};

/// Plaintext behind the hash verified when a login names an unknown email.
const DECOY_PASSWORD: &str = "rbac-api-decoy-password";

/// Input for self-service registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Authenticated subject resolved from an access token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: UserWithRoles,
    pub permissions: EffectivePermissions,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: UserWithRoles,
    pub permissions: EffectivePermissions,
    pub tokens: TokenPair,
}

pub struct AuthService {
    store: SharedStore,
    passwords: PasswordService,
    jwt: JwtService,
    mailer: Arc<dyn Mailer>,
    lockout: LockoutPolicy,
    config: AuthConfig,
    decoy_hash: HashedPassword,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        store: SharedStore,
        passwords: PasswordService,
        mailer: Arc<dyn Mailer>,
    ) -> AuthResult<Self> {
        let jwt = JwtService::from_config(&config)?;
        let decoy_hash = passwords.hash_password(DECOY_PASSWORD)?;
        Ok(Self {
            store,
            passwords,
            jwt,
            mailer,
            lockout: config.lockout_policy(),
            config,
            decoy_hash,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn lockout_policy(&self) -> &LockoutPolicy {
        &self.lockout
    }

    pub async fn register(&self, input: Registration, now: DateTime<Utc>) -> AuthResult<User> {
        let email = normalize_email(&input.email);
        let first_name = input.first_name.trim().to_string();
        let last_name = input.last_name.trim().to_string();

        let mut validator = Validator::new();
        validator
            .email("email", &email)
            .strong_password("password", &input.password)
            .length("firstName", &first_name, 1, MAX_NAME_LEN)
            .length("lastName", &last_name, 1, MAX_NAME_LEN);
        validator.finish().map_err(AuthError::Validation)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let default_role = self
            .store
            .find_role_by_name(DEFAULT_ROLE_NAME)
            .await?
            .ok_or_else(|| {
                AuthError::Other(format!("default role '{DEFAULT_ROLE_NAME}' is missing"))
            })?;

        let password_hash = self.passwords.hash_password_blocking(input.password).await?;
        let code = OneTimeCode::numeric(now, self.config.one_time_code_ttl());

        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash,
                first_name,
                last_name,
                role_ids: vec![default_role.id],
                is_active: true,
                email_verified: false,
                verification_code: Some(code.stored.clone()),
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict { .. } => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;

        log::info!("registered user {} ({})", user.id, user.email);
        if let Err(err) = self
            .mailer
            .send_verification_code(&user.email, &user.first_name, &code.code)
            .await
        {
            log::error!("failed to send verification code to {}: {}", user.email, err);
        }

        Ok(user)
    }

    /// Password login. Order matters: a locked account is rejected before the password is
    /// checked, and an inactive account is only reported once the password matched.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<LoginOutcome> {
        let email = normalize_email(email);
        let mut validator = Validator::new();
        validator.required("email", &email).required("password", password);
        validator.finish().map_err(AuthError::Validation)?;

        let record = match self.store.find_user_by_email(&email).await? {
            Some(record) => record,
            None => {
                // Unknown emails pay for one Argon2 verification, same as a wrong password.
                self.passwords
                    .verify_password_blocking(password.to_string(), self.decoy_hash.clone())
                    .await?;
                log::info!("login rejected: unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };
        let user_id = record.user.id;

        if self.lockout.is_locked(&record.lockout, now) {
            log::warn!("login rejected for {user_id}: account locked");
            return Err(AuthError::AccountLocked);
        }

        let verified = self
            .passwords
            .verify_password_blocking(password.to_string(), record.password_hash.clone())
            .await?;

        if !verified {
            let next = self.lockout.register_failure(&record.lockout, now);
            self.store.record_login_failure(user_id, next).await?;
            if self.lockout.is_locked(&next, now) {
                log::warn!(
                    "account {user_id} locked after {} failed attempts",
                    next.failed_attempts
                );
            } else {
                log::info!(
                    "login rejected for {user_id}: bad password ({} of {})",
                    next.failed_attempts,
                    self.lockout.max_attempts()
                );
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !record.user.is_active {
            log::info!("login rejected for {user_id}: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        self.store.record_login_success(user_id, now).await?;

        let user = self
            .store
            .load_user_with_roles(user_id)
            .await?
            .ok_or(AuthError::SubjectUnavailable)?;
        let permissions = user.effective_permissions();
        let tokens = self.jwt.issue_pair(user.user.id, &user.user.email)?;

        log::info!("user {user_id} logged in");
        Ok(LoginOutcome {
            user,
            permissions,
            tokens,
        })
    }

    /// Mint a new access token from a refresh token. The refresh token is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<SignedToken> {
        let claims = self.jwt.verify_refresh_token(refresh_token)?;
        let user_id = claims.subject_id()?;

        let record = self
            .store
            .find_user_record(user_id)
            .await?
            .filter(|record| record.user.is_active)
            .ok_or(AuthError::SubjectUnavailable)?;

        self.jwt
            .issue_access_token(record.user.id, &record.user.email)
    }

    /// Issue a reset code if the email belongs to an account. Unknown emails succeed
    /// silently so the endpoint does not reveal which addresses exist.
    pub async fn forgot_password(&self, email: &str, now: DateTime<Utc>) -> AuthResult<()> {
        let email = normalize_email(email);
        let mut validator = Validator::new();
        validator.email("email", &email);
        validator.finish().map_err(AuthError::Validation)?;

        let Some(record) = self.store.find_user_by_email(&email).await? else {
            log::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let code = OneTimeCode::numeric(now, self.config.one_time_code_ttl());
        self.store.set_reset_code(record.user.id, &code.stored).await?;

        if let Err(err) = self
            .mailer
            .send_password_reset_code(&record.user.email, &record.user.first_name, &code.code)
            .await
        {
            log::error!(
                "failed to send password reset code to {}: {}",
                record.user.email,
                err
            );
        }
        Ok(())
    }

    pub async fn reset_password(
        &self,
        code: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let code = code.trim();
        let mut validator = Validator::new();
        validator
            .numeric_code("code", code, NUMERIC_CODE_LEN)
            .strong_password("password", new_password);
        validator.finish().map_err(AuthError::Validation)?;

        let password_hash = self
            .passwords
            .hash_password_blocking(new_password.to_string())
            .await?;

        match self
            .store
            .consume_reset_code(&digest_code(code), now, &password_hash)
            .await?
        {
            Some(user) => {
                log::info!("password reset for user {}", user.id);
                Ok(())
            }
            None => Err(AuthError::InvalidCode),
        }
    }

    pub async fn verify_email(&self, code: &str, now: DateTime<Utc>) -> AuthResult<User> {
        let code = code.trim();
        let mut validator = Validator::new();
        validator.numeric_code("code", code, NUMERIC_CODE_LEN);
        validator.finish().map_err(AuthError::Validation)?;

        let user = self
            .store
            .consume_verification_code(&digest_code(code), now)
            .await?
            .ok_or(AuthError::InvalidCode)?;
        log::info!("email verified for user {}", user.id);
        Ok(user)
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let mut validator = Validator::new();
        validator
            .required("currentPassword", current_password)
            .strong_password("newPassword", new_password);
        validator.finish().map_err(AuthError::Validation)?;

        let record = self
            .store
            .find_user_record(user_id)
            .await?
            .ok_or(AuthError::SubjectUnavailable)?;

        let verified = self
            .passwords
            .verify_password_blocking(current_password.to_string(), record.password_hash)
            .await?;
        if !verified {
            return Err(AuthError::IncorrectPassword);
        }

        let password_hash = self
            .passwords
            .hash_password_blocking(new_password.to_string())
            .await?;
        self.store.set_password(user_id, &password_hash).await?;
        log::info!("password changed for user {user_id}");
        Ok(())
    }

    /// Verify an access token and reload the subject with its current roles, so permission
    /// changes take effect on the next request.
    pub async fn resolve_identity(&self, access_token: &str) -> AuthResult<Identity> {
        let claims = self.jwt.verify_access_token(access_token)?;
        let user_id = claims.subject_id()?;

        let user = self
            .store
            .load_user_with_roles(user_id)
            .await?
            .filter(|user| user.user.is_active)
            .ok_or_else(|| {
                log::info!("token subject {user_id} missing or inactive");
                AuthError::SubjectUnavailable
            })?;

        let permissions = user.effective_permissions();
        Ok(Identity { user, permissions })
    }

    pub async fn profile(&self, user_id: Uuid) -> AuthResult<UserWithRoles> {
        self.store
            .load_user_with_roles(user_id)
            .await?
            .ok_or(AuthError::SubjectUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::auth::codes::digest_code;
    use crate::test_support::{RecordingMailer, seeded_auth_service};

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.into(),
            password: "Abc12345!".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        }
    }

    #[tokio::test]
    async fn registered_user_gets_default_role_permissions() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        let user = service
            .register(registration(" Ada@Example.com "), now)
            .await
            .expect("register");
        assert_eq!(user.email, "ada@example.com");
        assert!(!user.email_verified);

        let outcome = service
            .login("ada@example.com", "Abc12345!", now)
            .await
            .expect("login");
        assert_eq!(outcome.permissions.into_names(), vec!["dashboard.access"]);

        let claims = service
            .jwt()
            .verify_access_token(&outcome.tokens.access.token)
            .expect("access token");
        assert_eq!(claims.subject_id().expect("uuid"), user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        service
            .register(registration("a@x.com"), now)
            .await
            .expect("first");
        let err = service
            .register(registration("A@x.com"), now)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn unknown_email_is_verified_against_decoy_hash() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        service
            .register(registration("known@x.com"), now)
            .await
            .expect("register");

        let err = service
            .login("nobody@x.com", "Abc12345!", now)
            .await
            .expect_err("unknown email");
        assert!(matches!(err, AuthError::InvalidCredentials));

        // Same Argon2 parameters as real account hashes, so both paths cost the same.
        let stored = service
            .store()
            .find_user_by_email("known@x.com")
            .await
            .expect("lookup")
            .expect("registered user")
            .password_hash;
        let params = |hash: &HashedPassword| -> Vec<String> {
            hash.as_str().split('$').take(4).map(str::to_string).collect()
        };
        assert_eq!(params(&service.decoy_hash), params(&stored));
        assert!(
            !service
                .passwords
                .verify_password("Abc12345!", &service.decoy_hash)
                .expect("decoy hash parses")
        );
    }

    #[tokio::test]
    async fn weak_password_reports_field_errors() {
        let (service, _, _) = seeded_auth_service().await;
        let mut input = registration("a@x.com");
        input.password = "password".into();
        input.first_name = "   ".into();
        match service.register(input, Utc::now()).await {
            Err(AuthError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["password", "firstName"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lockout_then_expiry() {
        let (service, _, _) = seeded_auth_service().await;
        let t0 = Utc::now();
        let user = service
            .register(registration("lock@x.com"), t0)
            .await
            .expect("register");

        for _ in 0..5 {
            let err = service
                .login("lock@x.com", "Wrong123!", t0)
                .await
                .expect_err("wrong password");
            assert!(matches!(err, AuthError::InvalidCredentials));
        }

        let err = service
            .login("lock@x.com", "Abc12345!", t0 + Duration::minutes(1))
            .await
            .expect_err("locked");
        assert!(matches!(err, AuthError::AccountLocked));

        let record = service
            .store()
            .find_user_record(user.id)
            .await
            .expect("store")
            .expect("user");
        assert_eq!(record.lockout.failed_attempts, 5);

        let later = t0 + Duration::hours(2) + Duration::seconds(1);
        service
            .login("lock@x.com", "Abc12345!", later)
            .await
            .expect("lock expired");

        let record = service
            .store()
            .find_user_record(user.id)
            .await
            .expect("store")
            .expect("user");
        assert_eq!(record.lockout.failed_attempts, 0);
        assert!(record.lockout.locked_until.is_none());
        assert_eq!(record.user.last_login, Some(later));
    }

    #[tokio::test]
    async fn inactive_account_with_correct_password_is_disabled() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        let user = service
            .register(registration("off@x.com"), now)
            .await
            .expect("register");
        service
            .store()
            .update_user(
                user.id,
                crate::models::UserChanges {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("deactivate");

        let err = service
            .login("off@x.com", "Abc12345!", now)
            .await
            .expect_err("disabled");
        assert!(matches!(err, AuthError::AccountDisabled));

        let record = service
            .store()
            .find_user_record(user.id)
            .await
            .expect("store")
            .expect("user");
        assert_eq!(record.lockout.failed_attempts, 0);
    }

    #[tokio::test]
    async fn reset_code_is_single_use() {
        let (service, mailer, _) = seeded_auth_service().await;
        let now = Utc::now();
        service
            .register(registration("reset@x.com"), now)
            .await
            .expect("register");
        service
            .forgot_password("reset@x.com", now)
            .await
            .expect("forgot");
        let code = mailer.last_reset_code("reset@x.com").expect("code sent");

        service
            .reset_password(&code, "NewPass1!", now)
            .await
            .expect("first reset");
        let err = service
            .reset_password(&code, "Other123!", now)
            .await
            .expect_err("second reset");
        assert!(matches!(err, AuthError::InvalidCode));

        service
            .login("reset@x.com", "NewPass1!", now)
            .await
            .expect("login with new password");
    }

    #[tokio::test]
    async fn expired_verification_code_is_rejected() {
        let (service, mailer, store) = seeded_auth_service().await;
        let now = Utc::now();
        let user = service
            .register(registration("verify@x.com"), now)
            .await
            .expect("register");
        let code = mailer
            .last_verification_code("verify@x.com")
            .expect("code sent");
        let stored = store.verification_code_for(user.id).expect("stored");
        assert_eq!(stored.digest, digest_code(&code));

        let err = service
            .verify_email(&code, now + Duration::minutes(16))
            .await
            .expect_err("expired");
        assert!(matches!(err, AuthError::InvalidCode));

        let verified = service.verify_email(&code, now).await.expect("verify");
        assert!(verified.email_verified);
    }

    #[tokio::test]
    async fn forgot_password_is_silent_for_unknown_email() {
        let (service, mailer, _) = seeded_auth_service().await;
        service
            .forgot_password("nobody@x.com", Utc::now())
            .await
            .expect("silent success");
        assert!(mailer.last_reset_code("nobody@x.com").is_none());
    }

    #[tokio::test]
    async fn refresh_requires_active_subject() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        let user = service
            .register(registration("refresh@x.com"), now)
            .await
            .expect("register");
        let outcome = service
            .login("refresh@x.com", "Abc12345!", now)
            .await
            .expect("login");

        let access = service
            .refresh(&outcome.tokens.refresh.token)
            .await
            .expect("refresh");
        assert!(service.jwt().verify_access_token(&access.token).is_ok());

        let err = service
            .refresh(&outcome.tokens.access.token)
            .await
            .expect_err("access token is not a refresh token");
        assert!(matches!(err, AuthError::TokenInvalid));

        service.store().delete_user(user.id).await.expect("delete");
        let err = service
            .refresh(&outcome.tokens.refresh.token)
            .await
            .expect_err("subject gone");
        assert!(matches!(err, AuthError::SubjectUnavailable));
    }

    #[tokio::test]
    async fn change_password_checks_current_password() {
        let (service, _, _) = seeded_auth_service().await;
        let now = Utc::now();
        let user = service
            .register(registration("change@x.com"), now)
            .await
            .expect("register");

        let err = service
            .change_password(user.id, "Wrong123!", "Next1234!")
            .await
            .expect_err("wrong current password");
        assert!(matches!(err, AuthError::IncorrectPassword));

        service
            .change_password(user.id, "Abc12345!", "Next1234!")
            .await
            .expect("change");
        service
            .login("change@x.com", "Next1234!", now)
            .await
            .expect("login with new password");
    }

    #[test]
    fn recording_mailer_starts_empty() {
        assert!(RecordingMailer::default().last_verification_code("a@x.com").is_none());
    }
}
