//! Input validation for request payloads.
//!
//! Handlers collect every failing field into a [`Validator`] and reject the request with
//! per-field messages in one response.

use std::sync::LazyLock;

use regex::Regex;
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

static PERMISSION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]*\.[a-z][a-z0-9_-]*$").expect("permission pattern compiles")
});

const PASSWORD_SPECIALS: &str = "@$!%*?&";

pub const MAX_EMAIL_LEN: usize = 255;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if value.len() > MAX_EMAIL_LEN {
            self.push(field, "email is too long");
        } else if !EMAIL_RE.is_match(value) {
            self.push(field, "invalid email");
        }
        self
    }

    /// Length and character-class rules applied to new passwords.
    pub fn strong_password(&mut self, field: &str, value: &str) -> &mut Self {
        let len = value.chars().count();
        if len < MIN_PASSWORD_LEN {
            self.push(field, "password must be at least 8 characters");
            return self;
        }
        if len > MAX_PASSWORD_LEN {
            self.push(field, "password is too long");
            return self;
        }
        let has_lower = value.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = value.chars().any(|c| c.is_ascii_uppercase());
        let has_digit = value.chars().any(|c| c.is_ascii_digit());
        let has_special = value.chars().any(|c| PASSWORD_SPECIALS.contains(c));
        if !(has_lower && has_upper && has_digit && has_special) {
            self.push(
                field,
                "password must contain a lowercase letter, an uppercase letter, a digit and one of @$!%*?&",
            );
        }
        self
    }

    /// Length-only password rule used for administrator-provisioned accounts.
    pub fn password_length(&mut self, field: &str, value: &str) -> &mut Self {
        let len = value.chars().count();
        if len < MIN_PASSWORD_LEN {
            self.push(field, "password must be at least 8 characters");
        } else if len > MAX_PASSWORD_LEN {
            self.push(field, "password is too long");
        }
        self
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.push(field, format!("{field} is required"));
        }
        self
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len < min {
            self.push(field, format!("{field} is required"));
        } else if len > max {
            self.push(field, format!("{field} must be at most {max} characters"));
        }
        self
    }

    pub fn numeric_code(&mut self, field: &str, value: &str, len: usize) -> &mut Self {
        if value.len() != len || !value.chars().all(|c| c.is_ascii_digit()) {
            self.push(field, format!("code must be exactly {len} digits"));
        }
        self
    }

    pub fn permission_name(&mut self, field: &str, value: &str) -> &mut Self {
        if !PERMISSION_NAME_RE.is_match(value) {
            self.push(field, "permission name must follow '<resource>.<action>'");
        }
        self
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Canonical form of an email address: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_strong_password() {
        let mut v = Validator::new();
        v.strong_password("password", "Abc12345!");
        assert!(v.finish().is_ok());
    }

    #[test]
    fn rejects_weak_passwords_with_field_messages() {
        let mut v = Validator::new();
        v.strong_password("password", "short")
            .strong_password("newPassword", "alllowercase1!");
        let errors = v.finish().expect_err("weak passwords rejected");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "password");
        assert_eq!(errors[1].field, "newPassword");
    }

    #[test]
    fn validates_email_and_codes() {
        let mut v = Validator::new();
        v.email("email", "a@x.com").numeric_code("code", "123456", 6);
        assert!(v.finish().is_ok());

        let mut v = Validator::new();
        v.email("email", "not-an-email")
            .numeric_code("code", "12a456", 6)
            .numeric_code("code", "1234567", 6);
        assert_eq!(v.finish().expect_err("invalid").len(), 3);
    }

    #[test]
    fn permission_names_follow_convention() {
        let mut v = Validator::new();
        v.permission_name("name", "user.read");
        assert!(v.finish().is_ok());

        let mut v = Validator::new();
        v.permission_name("name", "user");
        assert!(v.finish().is_err());
    }

    #[test]
    fn normalizes_email() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }
}
