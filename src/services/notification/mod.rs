//! Channel senders using the Strategy pattern.
//!
//! Every provider implements `ChannelSender`. The dispatcher looks senders up
//! in a `SenderRegistry` keyed by (channel, provider id), so adding a provider
//! only means registering another sender.
//!
//! Senders never fail for ordinary provider-side problems (bad credentials,
//! rejected template, invalid recipient, rate limit): those come back as a
//! failed `DeliveryResult`. Only transport failures (DNS, TLS, connect,
//! timeout) are returned as `Err(TransportError)`.

pub mod meta;
pub mod msg91;
pub mod sendgrid;
pub mod smtp;
pub mod twilio;
pub mod zeptomail;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, ProviderConfig, ProviderKind,
    RenderedMessage,
};

pub use meta::MetaWhatsappSender;
pub use msg91::Msg91Sender;
pub use sendgrid::SendGridSender;
pub use smtp::SmtpSender;
pub use twilio::TwilioSender;
pub use zeptomail::ZeptoMailSender;

// =============================================================================
// Transport Error
// =============================================================================

/// Failure below the provider protocol: the request never got a response
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport failure: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

// =============================================================================
// Channel Sender Trait
// =============================================================================

/// Trait for provider senders (Strategy pattern)
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender delivers on
    fn channel(&self) -> Channel;

    /// Provider identifier used in logs and delivery results
    fn provider(&self) -> &str;

    /// Sends one rendered message using the provider config's credentials.
    ///
    /// The destination is validated before any network call.
    async fn send(
        &self,
        message: &RenderedMessage,
        config: &ProviderConfig,
    ) -> Result<DeliveryResult, TransportError>;
}

// =============================================================================
// Sender Registry
// =============================================================================

/// Lookup table from (channel, provider id) to sender
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<(Channel, String), Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in provider
    pub fn with_defaults(timeout: Duration) -> Self {
        let twilio_whatsapp: Arc<dyn ChannelSender> =
            Arc::new(TwilioSender::new(Channel::Whatsapp, timeout));
        let twilio_sms: Arc<dyn ChannelSender> = Arc::new(TwilioSender::new(Channel::Sms, timeout));

        Self::new()
            .register(
                Channel::Email,
                ProviderKind::ZeptoMail.id(),
                Arc::new(ZeptoMailSender::new(timeout)),
            )
            .register(
                Channel::Email,
                ProviderKind::SendGrid.id(),
                Arc::new(SendGridSender::new(timeout)),
            )
            .register(
                Channel::Email,
                ProviderKind::Smtp.id(),
                Arc::new(SmtpSender::new(timeout)),
            )
            .register(
                Channel::Whatsapp,
                ProviderKind::Meta.id(),
                Arc::new(MetaWhatsappSender::new(timeout)),
            )
            .register(Channel::Whatsapp, ProviderKind::Twilio.id(), twilio_whatsapp)
            .register(Channel::Sms, ProviderKind::Twilio.id(), twilio_sms)
            .register(
                Channel::Sms,
                ProviderKind::Msg91.id(),
                Arc::new(Msg91Sender::new(timeout)),
            )
    }

    /// Registers (or replaces) the sender for a channel/provider pair
    pub fn register(
        mut self,
        channel: Channel,
        provider: &str,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        self.senders
            .insert((channel, provider.to_ascii_lowercase()), sender);
        self
    }

    pub fn get(&self, channel: Channel, provider: &str) -> Option<Arc<dyn ChannelSender>> {
        self.senders
            .get(&(channel, provider.to_ascii_lowercase()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Creates the HTTP client shared by a sender
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client")
}

/// Base URL from the `base_url` setting (used by tests) or the provider default
pub fn base_url<'a>(config: &'a ProviderConfig, default: &'a str) -> &'a str {
    config.setting_or("base_url", default).trim_end_matches('/')
}

/// Validates an email destination
pub fn validate_email(raw: &str) -> Result<lettre::Address, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Destination email address is missing".to_string());
    }

    trimmed
        .parse::<lettre::Address>()
        .map_err(|_| format!("Invalid email address: {}", trimmed))
}

/// Normalizes a phone number to E.164 digits without the leading '+'.
///
/// Ten-digit local numbers get `default_country_code`; a leading trunk `0`
/// is dropped first. The result must have 11 to 15 digits.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Destination phone number is missing".to_string());
    }

    let international = trimmed.starts_with('+');
    let mut digits = String::with_capacity(trimmed.len());

    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {}
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return Err(format!("Invalid phone number: {}", trimmed)),
        }
    }

    let normalized = if international {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else if digits.len() == 11 && digits.starts_with('0') {
        format!("{}{}", default_country_code, &digits[1..])
    } else if digits.len() == 10 {
        format!("{}{}", default_country_code, digits)
    } else {
        digits
    };

    if !(11..=15).contains(&normalized.len()) || normalized.starts_with('0') {
        return Err(format!("Invalid phone number: {}", trimmed));
    }

    Ok(normalized)
}

/// Default classification for a non-success HTTP status
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 425 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// Parses a response body as JSON, keeping non-JSON bodies as a string value
pub fn parse_body(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Failed result for a destination or content the provider cannot accept
pub fn validation_failure(
    channel: Channel,
    provider: &str,
    message: impl Into<String>,
) -> DeliveryResult {
    DeliveryResult::failed(
        channel,
        provider,
        DeliveryError::new(ErrorClass::Validation, message),
    )
}

/// Provider config fixture for sender tests
#[cfg(test)]
pub(crate) fn test_config(channel: Channel, provider: &str, pairs: &[(&str, &str)]) -> ProviderConfig {
    let settings = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    ProviderConfig {
        id: Some(1),
        site_id: 1,
        channel,
        provider: provider.to_string(),
        settings: sqlx::types::Json(settings),
        is_active: true,
        updated_at: chrono::Utc::now(),
        source: Default::default(),
    }
}
