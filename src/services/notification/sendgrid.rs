//! Email through the SendGrid v3 mail API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    base_url, classify_status, http_client, parse_body, validate_email, validation_failure,
    ChannelSender, TransportError,
};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, MessageContent, ProviderConfig, RenderedMessage,
};

const SENDGRID_BASE_URL: &str = "https://api.sendgrid.com";
const PROVIDER: &str = "sendgrid";

pub struct SendGridSender {
    client: reqwest::Client,
}

impl SendGridSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    fn build_body(
        to: &str,
        config: &ProviderConfig,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Value {
        // text/plain must precede text/html
        json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": {
                "email": config.setting_or("from_address", ""),
                "name": config.setting_or("from_name", ""),
            },
            "subject": subject,
            "content": [
                { "type": "text/plain", "value": text },
                { "type": "text/html", "value": html },
            ],
        })
    }

    fn classify(status: u16, body: &Value) -> DeliveryError {
        let message = body["errors"]
            .as_array()
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e["message"].as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status));

        DeliveryError::new(classify_status(status), message)
    }
}

#[async_trait]
impl ChannelSender for SendGridSender {
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

        let body = match &message.content {
            MessageContent::Email {
                subject,
                html,
                text,
            } => Self::build_body(&to.to_string(), config, subject, html, text),
            _ => {
                return Ok(validation_failure(
                    Channel::Email,
                    PROVIDER,
                    "Email provider requires email content",
                ))
            }
        };

        let url = format!("{}/v3/mail/send", base_url(config, SENDGRID_BASE_URL));

        let response = self
            .client
            .post(&url)
            .bearer_auth(config.setting_or("api_key", ""))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = parse_body(&response.text().await?);

        if status.is_success() {
            return Ok(DeliveryResult::sent(Channel::Email, PROVIDER, message_id)
                .with_status(status.as_u16())
                .with_raw(raw));
        }

        let error = Self::classify(status.as_u16(), &raw);
        log::warn!("SendGrid rejected email: {}", error);

        Ok(DeliveryResult::failed(Channel::Email, PROVIDER, error)
            .with_status(status.as_u16())
            .with_raw(raw))
    }
}
