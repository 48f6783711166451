//! Provider configuration models.
//!
//! A provider config binds a channel of a site to one concrete third-party
//! API plus its credentials. Configs come from the structured table, the
//! legacy flat settings, or compiled-in defaults (see `services::resolver`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::Channel;

// =============================================================================
// Config Source
// =============================================================================

/// Which resolution tier supplied a provider config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    #[default]
    Table,
    Legacy,
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Table => write!(f, "table"),
            ConfigSource::Legacy => write!(f, "legacy"),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

// =============================================================================
// Provider Kind
// =============================================================================

/// Known delivery providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    ZeptoMail,
    SendGrid,
    Smtp,
    Meta,
    Twilio,
    Msg91,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::ZeptoMail,
        ProviderKind::SendGrid,
        ProviderKind::Smtp,
        ProviderKind::Meta,
        ProviderKind::Twilio,
        ProviderKind::Msg91,
    ];

    /// Looks up a provider by its configured identifier
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::ZeptoMail => "zeptomail",
            ProviderKind::SendGrid => "sendgrid",
            ProviderKind::Smtp => "smtp",
            ProviderKind::Meta => "meta",
            ProviderKind::Twilio => "twilio",
            ProviderKind::Msg91 => "msg91",
        }
    }

    /// Whether this provider can back the given channel
    pub fn serves(&self, channel: Channel) -> bool {
        matches!(
            (self, channel),
            (ProviderKind::ZeptoMail, Channel::Email)
                | (ProviderKind::SendGrid, Channel::Email)
                | (ProviderKind::Smtp, Channel::Email)
                | (ProviderKind::Meta, Channel::Whatsapp)
                | (ProviderKind::Twilio, Channel::Whatsapp)
                | (ProviderKind::Twilio, Channel::Sms)
                | (ProviderKind::Msg91, Channel::Sms)
        )
    }

    /// Minimum credential set; a config missing any of these is unusable
    pub fn required_settings(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::ZeptoMail | ProviderKind::SendGrid => &["api_key", "from_address"],
            ProviderKind::Smtp => &["smtp_host", "from_address"],
            ProviderKind::Meta => &["access_token", "phone_number_id"],
            ProviderKind::Twilio => &["account_sid", "auth_token", "from_number"],
            ProviderKind::Msg91 => &["api_key", "template_id"],
        }
    }

    /// Whether the provider accepts pre-approved templates with positional parameters
    pub fn supports_templates(&self) -> bool {
        matches!(self, ProviderKind::Meta | ProviderKind::Msg91)
    }

    /// Provider used when legacy settings carry credentials but no provider name
    pub fn default_for(channel: Channel) -> Self {
        match channel {
            Channel::Email => ProviderKind::ZeptoMail,
            Channel::Whatsapp => ProviderKind::Meta,
            Channel::Sms => ProviderKind::Msg91,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Provider Config Model
// =============================================================================

/// Effective provider configuration for one (site, channel)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProviderConfig {
    pub id: Option<i64>,
    pub site_id: i32,
    pub channel: Channel,
    pub provider: String,
    #[serde(skip_serializing)]
    pub settings: Json<BTreeMap<String, String>>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub source: ConfigSource,
}

impl ProviderConfig {
    /// Returns a non-empty setting value
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Returns a setting or a fallback value
    pub fn setting_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.setting(key).unwrap_or(fallback)
    }

    pub fn kind(&self) -> Option<ProviderKind> {
        ProviderKind::from_id(&self.provider)
    }

    /// Names of required settings that are missing or blank
    pub fn missing_settings(&self) -> Vec<&'static str> {
        match self.kind() {
            Some(kind) => kind
                .required_settings()
                .iter()
                .copied()
                .filter(|key| self.setting(key).is_none())
                .collect(),
            None => Vec::new(),
        }
    }

    /// True when the config asks for template messages and the provider supports them
    pub fn template_mode(&self) -> bool {
        let supported = self.kind().map(|k| k.supports_templates()).unwrap_or(false);
        supported && self.setting_or("message_mode", "template") == "template"
    }
}

/// DTO for the admin provider upsert
#[derive(Debug, Clone, Deserialize)]
pub struct SaveProviderConfig {
    pub provider: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}
