use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::message::ReminderMessage;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// SMTP transport-level failure (connection, authentication, rejection).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("email build error: {0}")]
    Build(String),

    /// The SMTP server refused the connection probe.
    #[error("SMTP server did not accept the connection")]
    Unreachable,
}

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

const DEFAULT_FROM_ADDRESS: &str = "attendance@uni.local";

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl MailConfig {
    /// Load SMTP settings from the environment. Returns `None` when
    /// `SMTP_HOST` is unset, signalling that mail delivery is not configured.
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

/// Outbound mail seam. The dispatcher only ever talks to this trait, so
/// tests can substitute recording or failing gateways.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Cheap reachability probe, called once per dispatch run. A failure
    /// here means "could not even attempt" and must abort the run before
    /// any ledger rows are written.
    async fn verify(&self) -> Result<(), MailError>;

    /// Deliver one rendered reminder. Returns the provider message id when
    /// the server offers one.
    async fn send(&self, message: &ReminderMessage) -> Result<Option<String>, MailError>;
}

#[async_trait]
impl<T: MailGateway + ?Sized> MailGateway for std::sync::Arc<T> {
    async fn verify(&self) -> Result<(), MailError> {
        (**self).verify().await
    }

    async fn send(&self, message: &ReminderMessage) -> Result<Option<String>, MailError> {
        (**self).send(message).await
    }
}

pub struct SmtpMailer {
    from_address: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);

        if let (Some(user), Some(password)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        Ok(Self {
            from_address: config.from_address.clone(),
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailGateway for SmtpMailer {
    async fn verify(&self) -> Result<(), MailError> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(MailError::Unreachable)
        }
    }

    async fn send(&self, message: &ReminderMessage) -> Result<Option<String>, MailError> {
        let email = Message::builder()
            .from(self.from_address.parse()?)
            .to(message.to.parse()?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        let response = self.transport.send(email).await?;
        Ok(response.first_line().map(|line| line.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_returns_none_without_smtp_host() {
        std::env::remove_var("SMTP_HOST");
        assert!(MailConfig::from_env().is_none());
    }

    #[test]
    fn mail_error_display_build() {
        let err = MailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "email build error: missing body");
    }

    #[test]
    fn mail_error_display_address() {
        let parsed: Result<lettre::Address, _> = "not-an-email".parse();
        let err = MailError::Address(parsed.unwrap_err());
        assert!(err.to_string().contains("address parse error"));
    }
}
