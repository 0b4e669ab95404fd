//! One-time codes for email verification and password reset.
//!
//! The plaintext code only ever travels to the mailer. Storage keeps the SHA-256 digest and
//! an expiry, and lookups compare digests.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::models::StoredCode;

pub const NUMERIC_CODE_LEN: usize = 6;

const SECURE_TOKEN_BYTES: usize = 32;

/// Random URL-safe token (256 bits of entropy).
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; SECURE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Uniformly random six-digit code without a leading zero.
pub fn generate_numeric_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000u32).to_string()
}

pub fn digest_code(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// A freshly generated code together with its storable form.
#[derive(Debug, Clone)]
pub struct OneTimeCode {
    pub code: String,
    pub stored: StoredCode,
}

impl OneTimeCode {
    pub fn numeric(now: DateTime<Utc>, ttl: Duration) -> Self {
        let code = generate_numeric_code();
        let stored = StoredCode {
            digest: digest_code(&code),
            expires_at: now + ttl,
        };
        Self { code, stored }
    }
}
