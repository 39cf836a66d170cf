use crate::config::SmtpConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use log::warn;
use rand::Rng;
use std::error::Error;

pub type MailResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Delivers password reset codes.
pub trait ResetNotifier: Send + Sync {
    fn send_password_reset(&self, to_email: &str, reset_code: &str) -> MailResult;
}

/// SMTP delivery through a TLS relay.
pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let tls_parameters = TlsParameters::new(config.host.clone())?;

        let smtp = SmtpTransport::relay(&config.host)?
            .credentials(creds)
            .port(config.port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.from.clone(),
        })
    }
}

impl ResetNotifier for Mailer {
    fn send_password_reset(&self, to_email: &str, reset_code: &str) -> MailResult {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to_email.parse()?)
            .subject("Password Reset Request")
            .body(format!(
                "Your password reset code is: {}\nThis code will expire in 1 hour.",
                reset_code
            ))?;

        self.smtp.send(&email)?;
        Ok(())
    }
}

/// Used when no SMTP relay is configured: the code only reaches the log.
pub struct LogNotifier;

impl ResetNotifier for LogNotifier {
    fn send_password_reset(&self, to_email: &str, reset_code: &str) -> MailResult {
        warn!(
            "SMTP is not configured; password reset code for {} is {}",
            to_email, reset_code
        );
        Ok(())
    }
}

/// An 8-character code of uppercase letters and digits.
pub fn generate_reset_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
