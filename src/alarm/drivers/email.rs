use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, instrument};

use super::{Driver, DriverError};
use crate::alarm::AlarmContext;
use crate::config::EmailConfig;
use crate::util::retry_linear;

/// Sends alarms as HTML mail over SMTP
///
/// Every attempt opens its own SMTP connection, which is closed when the
/// transport goes out of scope, whatever the outcome of the attempt.
#[derive(Debug, Clone)]
pub struct EmailDriver {
    config: EmailConfig,
}

impl EmailDriver {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Configured sender, or `<username>@<smtp domain>`
    pub fn sender(&self) -> String {
        if let Some(from) = &self.config.from {
            return from.clone();
        }
        let domain = self
            .config
            .smtp_host
            .split_once('.')
            .map_or(self.config.smtp_host.as_str(), |(_, domain)| domain);
        format!("{}@{}", self.config.username, domain)
    }

    pub fn build_email(&self, title: &str, content: &str) -> Result<Message, DriverError> {
        if self.config.receivers.is_empty() {
            return Err(DriverError::Email("no receivers configured".to_string()));
        }

        let from: Mailbox = self
            .sender()
            .parse()
            .map_err(|e| DriverError::Email(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(title)
            .header(ContentType::TEXT_HTML);
        for receiver in &self.config.receivers {
            let to: Mailbox = receiver
                .parse()
                .map_err(|e| DriverError::Email(format!("invalid receiver {receiver}: {e}")))?;
            builder = builder.to(to);
        }

        builder
            .body(content.to_string())
            .map_err(|e| DriverError::Email(format!("failed to build email: {e}")))
    }

    async fn send_once(&self, email: Message) -> Result<(), DriverError> {
        let builder = if self.config.ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
        };

        let mut builder = builder.credentials(Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        ));
        if let Some(port) = self.config.smtp_port {
            builder = builder.port(port);
        }

        let transport = builder.build();
        transport.send(email).await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for EmailDriver {
    fn name(&self) -> &str {
        "email"
    }

    #[instrument(skip(self, content, _context))]
    async fn deliver(
        &self,
        title: &str,
        content: &str,
        _context: &AlarmContext,
    ) -> Result<(), DriverError> {
        let email = self.build_email(title, content)?;
        debug!("Sending email: '{title}'");

        let attempts = self.config.attempts;
        retry_linear(
            attempts,
            Duration::from_secs(self.config.retry_delay_secs),
            |_| self.send_once(email.clone()),
        )
        .await
        .map_err(|last| DriverError::Exhausted {
            attempts,
            last: Box::new(last),
        })?;

        info!("Sending mail: {title} successfully");
        Ok(())
    }
}
