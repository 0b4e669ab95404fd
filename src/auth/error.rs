use rocket::http::Status;
use thiserror::Error;

use crate::store::StoreError;
use crate::validation::FieldError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account temporarily locked due to too many failed login attempts")]
    AccountLocked,
    #[error("account disabled")]
    AccountDisabled,
    #[error("access token required")]
    TokenMissing,
    #[error("refresh token required")]
    RefreshTokenMissing,
    #[error("invalid token")]
    TokenInvalid,
    #[error("user not found or inactive")]
    SubjectUnavailable,
    #[error("insufficient permission")]
    Forbidden { required: Vec<String> },
    #[error("insufficient role")]
    MissingRole { required: String },
    #[error("access denied: you can only access your own records")]
    NotOwner,
    #[error("invalid or expired code")]
    InvalidCode,
    #[error("current password is incorrect")]
    IncorrectPassword,
    #[error("a user with this email already exists")]
    EmailTaken,
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("too many requests, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountDisabled
            | AuthError::TokenMissing
            | AuthError::RefreshTokenMissing
            | AuthError::TokenInvalid
            | AuthError::SubjectUnavailable => Status::Unauthorized,
            AuthError::AccountLocked => Status::Locked,
            AuthError::Forbidden { .. } | AuthError::MissingRole { .. } | AuthError::NotOwner => {
                Status::Forbidden
            }
            AuthError::InvalidCode | AuthError::IncorrectPassword | AuthError::Validation(_) => {
                Status::BadRequest
            }
            AuthError::EmailTaken => Status::Conflict,
            AuthError::RateLimited { .. } => Status::TooManyRequests,
            AuthError::Config(_)
            | AuthError::Store(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_)
            | AuthError::Other(_) => Status::InternalServerError,
        }
    }

    /// Whether the error reflects an infrastructure fault rather than a rejected request.
    pub fn is_internal(&self) -> bool {
        self.status() == Status::InternalServerError
    }

    /// Message safe to show to clients. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}
