//! WhatsApp delivery through the Meta Cloud (Graph) API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    base_url, classify_status, http_client, normalize_phone, parse_body, validation_failure,
    ChannelSender, TransportError,
};
use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, MessageContent, ProviderConfig,
    RenderedMessage,
};

const GRAPH_BASE_URL: &str = "https://graph.facebook.com";
const PROVIDER: &str = "meta";

/// Graph error codes that will not succeed on retry
const PERMANENT_CODES: &[i64] = &[
    10, 190, 200, 131026, 131030, 131047, 131051, 132000, 132001, 132005, 132007, 132012, 132015,
    132016,
];

/// Graph error codes for throttling and temporary outages
const TRANSIENT_CODES: &[i64] = &[2, 4, 80007, 130429, 131000, 131016, 131048, 131056];

/// WhatsApp Cloud API sender
pub struct MetaWhatsappSender {
    client: reqwest::Client,
}

impl MetaWhatsappSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
        }
    }

    /// Builds the Graph API message body
    fn build_body(to: &str, content: &MessageContent) -> Result<Value, String> {
        match content {
            MessageContent::Template {
                name,
                language,
                parameters,
            } => {
                let mut template = json!({
                    "name": name,
                    "language": { "code": language },
                });

                if !parameters.is_empty() {
                    let params: Vec<Value> = parameters
                        .iter()
                        .map(|p| json!({ "type": "text", "text": p }))
                        .collect();
                    template["components"] = json!([{ "type": "body", "parameters": params }]);
                }

                Ok(json!({
                    "messaging_product": "whatsapp",
                    "to": to,
                    "type": "template",
                    "template": template,
                }))
            }
            MessageContent::Text { body } => Ok(json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "text",
                "text": { "body": body },
            })),
            MessageContent::Email { .. } => {
                Err("Email content cannot be sent over WhatsApp".to_string())
            }
        }
    }

    /// Classifies a Graph API error response
    fn classify(status: u16, body: &Value) -> DeliveryError {
        let error = &body["error"];
        let code = error["code"].as_i64();
        let message = error["error_data"]["details"]
            .as_str()
            .or_else(|| error["message"].as_str())
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
impl ChannelSender for MetaWhatsappSender {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
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
        let to = match normalize_phone(&message.destination, country_code) {
            Ok(to) => to,
            Err(e) => return Ok(validation_failure(Channel::Whatsapp, PROVIDER, e)),
        };

        let body = match Self::build_body(&to, &message.content) {
            Ok(body) => body,
            Err(e) => return Ok(validation_failure(Channel::Whatsapp, PROVIDER, e)),
        };

        let url = format!(
            "{}/{}/{}/messages",
            base_url(config, GRAPH_BASE_URL),
            config.setting_or("graph_api_version", "v21.0"),
            config.setting_or("phone_number_id", "")
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(config.setting_or("access_token", ""))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = parse_body(&response.text().await?);

        if status.is_success() {
            let result = match raw["messages"][0]["id"].as_str() {
                Some(id) => {
                    log::debug!("WhatsApp message accepted by Meta: {}", id);
                    DeliveryResult::sent(Channel::Whatsapp, PROVIDER, Some(id.to_string()))
                }
                None => DeliveryResult::failed(
                    Channel::Whatsapp,
                    PROVIDER,
                    DeliveryError::new(
                        ErrorClass::Transient,
                        "Success response without a message id",
                    ),
                ),
            };
            return Ok(result.with_status(status.as_u16()).with_raw(raw));
        }

        let error = Self::classify(status.as_u16(), &raw);
        log::warn!("Meta rejected WhatsApp message: {}", error);

        Ok(
            DeliveryResult::failed(Channel::Whatsapp, PROVIDER, error)
                .with_status(status.as_u16())
                .with_raw(raw),
        )
    }
}
