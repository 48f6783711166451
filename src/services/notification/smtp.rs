//! Email over SMTP using lettre.
//!
//! Only used when a site explicitly configures `smtp`. Port 465 uses
//! implicit TLS, any other port STARTTLS.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::{validate_email, validation_failure, ChannelSender, TransportError};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, MessageContent, ProviderConfig,
    RenderedMessage,
};

const PROVIDER: &str = "smtp";
const DEFAULT_PORT: u16 = 587;

pub struct SmtpSender {
    timeout: Duration,
}

impl SmtpSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn failure(class: ErrorClass, message: impl Into<String>) -> DeliveryResult {
        DeliveryResult::failed(Channel::Email, PROVIDER, DeliveryError::new(class, message))
    }

    /// Builds the MIME message (plain text plus HTML alternative)
    fn build_message(
        config: &ProviderConfig,
        to: Address,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<Message, DeliveryResult> {
        let from_address: Address = config
            .setting_or("from_address", "")
            .parse()
            .map_err(|e| Self::failure(ErrorClass::Permanent, format!("Invalid from address: {}", e)))?;

        let from_name = config.setting("from_name").map(str::to_string);

        Message::builder()
            .from(Mailbox::new(from_name, from_address))
            .to(Mailbox::new(None, to))
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html.to_string(),
            ))
            .map_err(|e| Self::failure(ErrorClass::Validation, format!("Failed to build email: {}", e)))
    }

    /// Builds the SMTP transport for a config
    fn transport(
        &self,
        config: &ProviderConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryResult> {
        let host = config.setting_or("smtp_host", "");
        let port = config
            .setting("smtp_port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let builder = if port == 465 {
            let tls = TlsParameters::new(host.to_string()).map_err(|e| {
                Self::failure(
                    ErrorClass::Permanent,
                    format!("Invalid TLS parameters for SMTP host: {}", e),
                )
            })?;

            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map(|b| b.port(port).tls(Tls::Wrapper(tls)))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map(|b| b.port(port))
        }
        .map_err(|e| Self::failure(ErrorClass::Permanent, format!("Invalid SMTP host: {}", e)))?;

        let builder = builder.timeout(Some(self.timeout));

        let transport = match (config.setting("smtp_username"), config.setting("smtp_password")) {
            (Some(username), Some(password)) => builder
                .credentials(Credentials::new(username.to_string(), password.to_string()))
                .build(),
            _ => builder.build(),
        };

        Ok(transport)
    }
}

#[async_trait]
impl ChannelSender for SmtpSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        config: &ProviderConfig,
    ) -> Result<DeliveryResult, TransportError> {
        let to = match validate_email(&message.destination) {
            Ok(to) => to,
            Err(e) => return Ok(validation_failure(Channel::Email, PROVIDER, e)),
        };

        let (subject, html, text) = match &message.content {
            MessageContent::Email {
                subject,
                html,
                text,
            } => (subject, html, text),
            _ => {
                return Ok(validation_failure(
                    Channel::Email,
                    PROVIDER,
                    "Email provider requires email content",
                ))
            }
        };

        let email = match Self::build_message(config, to, subject, html, text) {
            Ok(email) => email,
            Err(result) => return Ok(result),
        };

        let mailer = match self.transport(config) {
            Ok(mailer) => mailer,
            Err(result) => return Ok(result),
        };

        match mailer.send(email).await {
            Ok(response) => {
                let reply = response.message().collect::<Vec<_>>().join(" ");
                log::debug!("SMTP server accepted email: {}", reply);
                let message_id = Some(reply).filter(|r| !r.is_empty());
                Ok(DeliveryResult::sent(Channel::Email, PROVIDER, message_id))
            }
            Err(e) if e.is_permanent() => {
                let code = e.status().map(|c| c.to_string());
                let error = DeliveryError::new(ErrorClass::Permanent, e.to_string());
                let error = match code {
                    Some(code) => error.with_code(code),
                    None => error,
                };
                Ok(DeliveryResult::failed(Channel::Email, PROVIDER, error))
            }
            Err(e) if e.is_transient() => Ok(Self::failure(ErrorClass::Transient, e.to_string())),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout(e.to_string())),
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }
}
