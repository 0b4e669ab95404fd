//! Access and refresh token issuance and verification.
//!
//! Each token class has its own HMAC key and TTL, and every payload carries a `typ` tag.
//! Verification checks the tag as well as the signature, so a refresh token is rejected
//! by the access validator even if both classes were configured with the same key.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult};

const LEEWAY_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub email: String,
    pub typ: TokenType,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl TokenClaims {
    pub fn subject_id(&self) -> AuthResult<Uuid> {
        self.sub.parse().map_err(|_| AuthError::TokenInvalid)
    }
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SignedToken,
    pub refresh: SignedToken,
}

struct TokenKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::seconds(ttl_secs),
        }
    }
}

pub struct JwtService {
    access: TokenKeys,
    refresh: TokenKeys,
    validation: Validation,
    issuer: String,
    audience: String,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.access_token_secret.is_empty() || config.refresh_token_secret.is_empty() {
            return Err(AuthError::Config("token signing secrets must not be empty".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = LEEWAY_SECS;

        Ok(Self {
            access: TokenKeys::new(&config.access_token_secret, config.access_token_ttl_secs),
            refresh: TokenKeys::new(&config.refresh_token_secret, config.refresh_token_ttl_secs),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    pub fn issue_access_token(&self, user_id: Uuid, email: &str) -> AuthResult<SignedToken> {
        self.issue(TokenType::Access, user_id, email)
    }

    pub fn issue_refresh_token(&self, user_id: Uuid, email: &str) -> AuthResult<SignedToken> {
        self.issue(TokenType::Refresh, user_id, email)
    }

    pub fn issue_pair(&self, user_id: Uuid, email: &str) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access: self.issue_access_token(user_id, email)?,
            refresh: self.issue_refresh_token(user_id, email)?,
        })
    }

    pub fn verify_access_token(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify(TokenType::Access, token)
    }

    pub fn verify_refresh_token(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify(TokenType::Refresh, token)
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    fn keys(&self, typ: TokenType) -> &TokenKeys {
        match typ {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    fn issue(&self, typ: TokenType, user_id: Uuid, email: &str) -> AuthResult<SignedToken> {
        let keys = self.keys(typ);
        let now = Utc::now();
        let expires_at = now + keys.ttl;

        let claims = TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            typ,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding_key)?;
        Ok(SignedToken { token, expires_at })
    }

    fn verify(&self, expected: TokenType, token: &str) -> AuthResult<TokenClaims> {
        let keys = self.keys(expected);
        let claims = match decode::<TokenClaims>(token, &keys.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(err) => {
                log::debug!("rejected {} token: {}", expected.as_str(), err);
                return Err(AuthError::TokenInvalid);
            }
        };

        if claims.typ != expected {
            log::debug!(
                "rejected {} token: payload tagged {}",
                expected.as_str(),
                claims.typ.as_str()
            );
            return Err(AuthError::TokenInvalid);
        }

        Ok(claims)
    }
}
