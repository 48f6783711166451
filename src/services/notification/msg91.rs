//! SMS delivery through the MSG91 flow API.
//!
//! MSG91 only sends DLT-registered flows, so every message goes out as a
//! flow with up to five positional variables.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{
    base_url, classify_status, http_client, normalize_phone, parse_body, validation_failure,
    ChannelSender, TransportError,
};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, MessageContent, ProviderConfig,
    RenderedMessage,
};

const MSG91_BASE_URL: &str = "https://control.msg91.com";
const PROVIDER: &str = "msg91";
const MAX_VARIABLES: usize = 5;

pub struct Msg91Sender {
    client: reqwest::Client,
}

impl Msg91Sender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    /// Builds the flow request body
    fn build_body(template_id: &str, mobile: &str, variables: &[String]) -> Value {
        let mut recipient = Map::new();
        recipient.insert("mobiles".to_string(), json!(mobile));
        for (i, value) in variables.iter().take(MAX_VARIABLES).enumerate() {
            recipient.insert(format!("var{}", i + 1), json!(value));
        }

        json!({
            "template_id": template_id,
            "short_url": "0",
            "recipients": [recipient],
        })
    }

    fn error_from(status: u16, body: &Value) -> DeliveryError {
        let message = body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status));

        // MSG91 answers most rejections with 200 and {"type":"error"}
        let class = if (200..300).contains(&status) {
            ErrorClass::Permanent
        } else {
            classify_status(status)
        };

        let error = DeliveryError::new(class, message);
        match &body["code"] {
            Value::String(code) => error.with_code(code.clone()),
            Value::Number(code) => error.with_code(code.to_string()),
            _ => error,
        }
    }
}

#[async_trait]
impl ChannelSender for Msg91Sender {
    fn channel(&self) -> Channel {
        Channel::Sms
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
        let mobile = match normalize_phone(&message.destination, country_code) {
            Ok(mobile) => mobile,
            Err(e) => return Ok(validation_failure(Channel::Sms, PROVIDER, e)),
        };

        let body = match &message.content {
            MessageContent::Template {
                name, parameters, ..
            } => Self::build_body(name, &mobile, parameters),
            MessageContent::Text { body } => Self::build_body(
                config.setting_or("template_id", ""),
                &mobile,
                std::slice::from_ref(body),
            ),
            MessageContent::Email { .. } => {
                return Ok(validation_failure(
                    Channel::Sms,
                    PROVIDER,
                    "Email content cannot be sent over SMS",
                ))
            }
        };

        let url = format!("{}/api/v5/flow/", base_url(config, MSG91_BASE_URL));

        let response = self
            .client
            .post(&url)
            .header("authkey", config.setting_or("api_key", ""))
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = parse_body(&response.text().await?);

        let accepted = status.is_success() && raw["type"].as_str() == Some("success");
        if accepted {
            let request_id = raw["message"].as_str().map(str::to_string);
            return Ok(DeliveryResult::sent(Channel::Sms, PROVIDER, request_id)
                .with_status(status.as_u16())
                .with_raw(raw));
        }

        let error = if status.is_success() && raw["type"].as_str().is_none() {
            DeliveryError::new(ErrorClass::Transient, "Unrecognized MSG91 response")
        } else {
            Self::error_from(status.as_u16(), &raw)
        };
        log::warn!("MSG91 rejected SMS: {}", error);

        Ok(DeliveryResult::failed(Channel::Sms, PROVIDER, error)
            .with_status(status.as_u16())
            .with_raw(raw))
    }
}
