//! Transactional email through ZeptoMail.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    base_url, classify_status, http_client, parse_body, validate_email, validation_failure,
    ChannelSender, TransportError,
};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, MessageContent, ProviderConfig,
    RenderedMessage,
};

const ZEPTOMAIL_BASE_URL: &str = "https://api.zeptomail.in";
const PROVIDER: &str = "zeptomail";
const AUTH_SCHEME: &str = "Zoho-enczapikey";

/// Codes for bad credentials, unverified senders and invalid payloads
const PERMANENT_CODES: &[&str] = &[
    "TM_3201", "TM_3301", "TM_3501", "TM_3601", "TM_4001", "SERR_157",
];

pub struct ZeptoMailSender {
    client: reqwest::Client,
}

impl ZeptoMailSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    /// Authorization header value; accepts keys stored with or without the scheme
    fn authorization(api_key: &str) -> String {
        if api_key.starts_with(AUTH_SCHEME) {
            api_key.to_string()
        } else {
            format!("{} {}", AUTH_SCHEME, api_key)
        }
    }

    fn classify(status: u16, body: &Value) -> DeliveryError {
        let error = &body["error"];
        let detail = &error["details"][0];

        // Prefer the detail code, it is more specific than the top-level one
        let code = detail["code"]
            .as_str()
            .filter(|c| PERMANENT_CODES.contains(c))
            .or_else(|| error["code"].as_str());

        let message = detail["message"]
            .as_str()
            .or_else(|| error["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));

        let class = match code {
            Some(c) if PERMANENT_CODES.contains(&c) => ErrorClass::Permanent,
            _ => classify_status(status),
        };

        let error = DeliveryError::new(class, message);
        match code {
            Some(c) => error.with_code(c),
            None => error,
        }
    }
}

#[async_trait]
impl ChannelSender for ZeptoMailSender {
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

        let body = json!({
            "from": {
                "address": config.setting_or("from_address", ""),
                "name": config.setting_or("from_name", ""),
            },
            "to": [{ "email_address": { "address": to.to_string() } }],
            "subject": subject,
            "htmlbody": html,
            "textbody": text,
        });

        let url = format!("{}/v1.1/email", base_url(config, ZEPTOMAIL_BASE_URL));

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, Self::authorization(config.setting_or("api_key", "")))
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = parse_body(&response.text().await?);

        if status.is_success() {
            let result = match raw["request_id"].as_str() {
                Some(id) => DeliveryResult::sent(Channel::Email, PROVIDER, Some(id.to_string())),
                None => DeliveryResult::failed(
                    Channel::Email,
                    PROVIDER,
                    DeliveryError::new(
                        ErrorClass::Transient,
                        "Success response without a request id",
                    ),
                ),
            };
            return Ok(result.with_status(status.as_u16()).with_raw(raw));
        }

        let error = Self::classify(status.as_u16(), &raw);
        log::warn!("ZeptoMail rejected email: {}", error);

        Ok(DeliveryResult::failed(Channel::Email, PROVIDER, error)
            .with_status(status.as_u16())
            .with_raw(raw))
    }
}
