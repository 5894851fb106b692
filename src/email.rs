use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::errors::AppError;

/// Outbound mail for admin-created account credentials.
///
/// SMTP settings come from `SMTP_HOST` / `SMTP_PORT` / `SMTP_USER` /
/// `SMTP_PASSWORD` / `EMAIL_FROM`. When `SMTP_HOST` is absent the mailer runs
/// disabled and only logs what it would have sent, so local and test setups
/// work without a mail account.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl Mailer {
    pub fn from_env() -> Result<Self, AppError> {
        let from = std::env::var("EMAIL_FROM").unwrap_or_else(|_| "Taskboard <no-reply@taskboard.local>".to_string());

        let Ok(host) = std::env::var("SMTP_HOST") else {
            tracing::warn!("SMTP_HOST not set, outbound email disabled");
            return Ok(Self { transport: None, from });
        };

        let port = std::env::var("SMTP_PORT")
            .map(|val| val.parse::<u16>())
            .unwrap_or(Ok(587))
            .map_err(|_| AppError::configuration("SMTP_PORT must be a valid port number"))?;
        let user = std::env::var("SMTP_USER")
            .map_err(|_| AppError::configuration("SMTP_USER not set"))?;
        let password = std::env::var("SMTP_PASSWORD")
            .map_err(|_| AppError::configuration("SMTP_PASSWORD not set"))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
            .map_err(|err| AppError::configuration(format!("invalid SMTP relay '{host}': {err}")))?
            .port(port)
            .credentials(Credentials::new(user, password))
            .build();

        Ok(Self {
            transport: Some(transport),
            from,
        })
    }

    /// Mail the one-time credentials for an admin-created account.
    pub async fn send_temp_password(&self, to_email: &str, to_name: &str, temp_password: &str) -> Result<(), AppError> {
        let subject = "Your new account credentials";
        let body = format!(
            "<p>Hi {to_name},</p>\
             <p>An account has been created for you.</p>\
             <p>Email: <strong>{to_email}</strong><br>\
             Temporary password: <strong>{temp_password}</strong></p>\
             <p>You will be asked to change this password on first sign-in.</p>"
        );

        let Some(transport) = &self.transport else {
            tracing::info!(email = %to_email, "mailer disabled, skipping credentials email");
            return Ok(());
        };

        let from = self
            .from
            .parse::<Mailbox>()
            .map_err(|err| AppError::internal(format!("invalid EMAIL_FROM: {err}")))?;
        let to = format!("{to_name} <{to_email}>")
            .parse::<Mailbox>()
            .map_err(|err| AppError::bad_request(format!("invalid recipient address: {err}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|err| AppError::internal(format!("failed to build email: {err}")))?;

        transport
            .send(message)
            .await
            .map_err(|err| AppError::internal(format!("failed to send email: {err}")))?;

        tracing::info!(email = %to_email, "credentials email sent");
        Ok(())
    }
}
