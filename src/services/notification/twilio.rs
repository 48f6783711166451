//! Twilio Messages API sender, used for both WhatsApp and SMS.
//!
//! Twilio only carries freeform bodies here; template messages are rejected
//! before any request is made.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;

use super::{
    base_url, classify_status, http_client, normalize_phone, parse_body, validation_failure,
    ChannelSender, TransportError,
};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, MessageContent, ProviderConfig,
    RenderedMessage,
};

const TWILIO_BASE_URL: &str = "https://api.twilio.com";
const PROVIDER: &str = "twilio";

const PERMANENT_CODES: &[i64] = &[20003, 21211, 21408, 21610, 21614, 63016];
const TRANSIENT_CODES: &[i64] = &[20429, 30001];

pub struct TwilioSender {
    client: reqwest::Client,
    channel: Channel,
}

impl TwilioSender {
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            channel,
        }
    }

    /// Formats an address for this channel (`whatsapp:+..` or `+..`)
    fn address(&self, number: &str) -> String {
        let number = number.trim();
        match self.channel {
            Channel::Whatsapp if number.starts_with("whatsapp:") => number.to_string(),
            Channel::Whatsapp if number.starts_with('+') => format!("whatsapp:{}", number),
            Channel::Whatsapp => format!("whatsapp:+{}", number),
            _ => number.to_string(),
        }
    }

    /// Form-encoded request body
    fn form(to: &str, from: &str, body: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("To", to)
            .append_pair("From", from)
            .append_pair("Body", body)
            .finish()
    }

    fn classify(status: u16, body: &Value) -> DeliveryError {
        let code = body["code"].as_i64();
        let message = body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));

        let class = match code {
            Some(c) if PERMANENT_CODES.contains(&c) => ErrorClass::Permanent,
            Some(c) if TRANSIENT_CODES.contains(&c) => ErrorClass::Transient,
            _ => classify_status(status),
        };

        let error = DeliveryError::new(class, message);
        match code {
            Some(c) => error.with_code(c.to_string()),
            None => error,
        }
    }
}

#[async_trait]
impl ChannelSender for TwilioSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        config: &ProviderConfig,
    ) -> Result<DeliveryResult, TransportError> {
        let country_code = config.setting_or("default_country_code", "91");
        let digits = match normalize_phone(&message.destination, country_code) {
            Ok(digits) => digits,
            Err(e) => return Ok(validation_failure(self.channel, PROVIDER, e)),
        };

        let text = match &message.content {
            MessageContent::Text { body } => body,
            MessageContent::Template { .. } => {
                return Ok(validation_failure(
                    self.channel,
                    PROVIDER,
                    "Twilio does not support template messages",
                ))
            }
            MessageContent::Email { .. } => {
                return Ok(validation_failure(
                    self.channel,
                    PROVIDER,
                    "Email content cannot be sent through Twilio",
                ))
            }
        };

        let account_sid = config.setting_or("account_sid", "");
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            base_url(config, TWILIO_BASE_URL),
            account_sid
        );

        let form = Self::form(
            &self.address(&format!("+{}", digits)),
            &self.address(config.setting_or("from_number", "")),
            text,
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(account_sid, Some(config.setting_or("auth_token", "")))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;

        let status = response.status();
        let raw = parse_body(&response.text().await?);

        if status.is_success() {
            let result = match raw["sid"].as_str() {
                Some(sid) => DeliveryResult::sent(self.channel, PROVIDER, Some(sid.to_string())),
                None => DeliveryResult::failed(
                    self.channel,
                    PROVIDER,
                    DeliveryError::new(ErrorClass::Transient, "Success response without a sid"),
                ),
            };
            return Ok(result.with_status(status.as_u16()).with_raw(raw));
        }

        let error = Self::classify(status.as_u16(), &raw);
        log::warn!("Twilio rejected {} message: {}", self.channel, error);

        Ok(DeliveryResult::failed(self.channel, PROVIDER, error)
            .with_status(status.as_u16())
            .with_raw(raw))
    }
}
