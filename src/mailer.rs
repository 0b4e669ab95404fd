//! Outbound notification seam for one-time codes.
//!
//! Delivery failures never fail the request that triggered them; callers log and move on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(
        &self,
        email: &str,
        first_name: &str,
        code: &str,
    ) -> Result<(), MailError>;

    async fn send_password_reset_code(
        &self,
        email: &str,
        first_name: &str,
        code: &str,
    ) -> Result<(), MailError>;
}

/// Writes codes to the log instead of sending mail. Codes are logged at debug level only.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[rocket::async_trait]
impl Mailer for LogMailer {
    async fn send_verification_code(
        &self,
        email: &str,
        first_name: &str,
        code: &str,
    ) -> Result<(), MailError> {
        log::info!("verification code issued for {email}");
        log::debug!("verification code for {first_name} <{email}>: {code}");
        Ok(())
    }

    async fn send_password_reset_code(
        &self,
        email: &str,
        first_name: &str,
        code: &str,
    ) -> Result<(), MailError> {
        log::info!("password reset code issued for {email}");
        log::debug!("password reset code for {first_name} <{email}>: {code}");
        Ok(())
    }
}
