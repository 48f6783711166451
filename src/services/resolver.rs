//! Provider configuration resolver.
//!
//! Resolution order for a (site, channel):
//! 1. the structured `provider_configs` table (latest active row)
//! 2. legacy flat settings (`{channel}_provider`, `{channel}_api_key`, ...)
//! 3. compiled-in defaults, which only fill optional settings
//!
//! "Not configured" is a normal result, not an error.

use chrono::Utc;
use sqlx::types::Json;
use std::collections::BTreeMap;

use crate::error::AppResult;
use crate::models::{Channel, ConfigSource, ProviderConfig, ProviderKind};
use crate::services::renderer::{DEFAULT_TEMPLATE_LANGUAGE, DEFAULT_TEMPLATE_NAME};
use crate::store::RecordStore;

/// Result of resolving a channel's provider
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ProviderConfig),
    NotConfigured(String),
}

impl Resolution {
    pub fn config(&self) -> Option<&ProviderConfig> {
        match self {
            Resolution::Resolved(config) => Some(config),
            Resolution::NotConfigured(_) => None,
        }
    }
}

pub struct ProviderResolver;

impl ProviderResolver {
    /// Resolves the effective provider config for a site and channel
    pub async fn resolve(
        store: &dyn RecordStore,
        site_id: i32,
        channel: Channel,
    ) -> AppResult<Resolution> {
        // Tier 1: structured table
        let mut table_problem = None;
        if let Some(config) = store.active_provider_config(site_id, channel).await? {
            match Self::check(&config, channel) {
                Ok(()) => {
                    let config = Self::with_defaults(config, ConfigSource::Table);
                    log::info!(
                        "Resolved {} provider '{}' for site {} from {} config",
                        channel,
                        config.provider,
                        site_id,
                        config.source
                    );
                    return Ok(Resolution::Resolved(config));
                }
                Err(problem) => {
                    log::warn!(
                        "Ignoring {} provider config {:?} for site {}: {}",
                        channel,
                        config.id,
                        site_id,
                        problem
                    );
                    table_problem = Some(problem);
                }
            }
        }

        // Tier 2: legacy flat settings
        let prefix = format!("{}_", channel);
        let legacy = store.legacy_settings(site_id, &prefix).await?;
        if let Some(config) = Self::from_legacy(site_id, channel, legacy) {
            match Self::check(&config, channel) {
                Ok(()) => {
                    let config = Self::with_defaults(config, ConfigSource::Legacy);
                    log::info!(
                        "Resolved {} provider '{}' for site {} from {} settings",
                        channel,
                        config.provider,
                        site_id,
                        config.source
                    );
                    return Ok(Resolution::Resolved(config));
                }
                Err(problem) => {
                    log::debug!(
                        "Legacy {} settings for site {} unusable: {}",
                        channel,
                        site_id,
                        problem
                    );
                    table_problem.get_or_insert(problem);
                }
            }
        }

        // Tier 3: defaults never carry credentials
        let reason = table_problem.unwrap_or_else(|| "no provider configured".to_string());
        log::info!(
            "No usable {} provider for site {}: {}",
            channel,
            site_id,
            reason
        );
        Ok(Resolution::NotConfigured(reason))
    }

    /// Checks provider identity and the minimum credential set
    fn check(config: &ProviderConfig, channel: Channel) -> Result<(), String> {
        let kind = ProviderKind::from_id(&config.provider)
            .ok_or_else(|| format!("unknown provider '{}'", config.provider))?;

        if !kind.serves(channel) {
            return Err(format!("provider '{}' cannot send {}", kind, channel));
        }

        let missing = config.missing_settings();
        if !missing.is_empty() {
            return Err(format!(
                "provider '{}' is missing {}",
                kind,
                missing.join(", ")
            ));
        }

        Ok(())
    }

    /// Builds a config from legacy settings (prefix already stripped).
    ///
    /// Returns None when there is nothing channel-specific besides switches.
    fn from_legacy(
        site_id: i32,
        channel: Channel,
        mut settings: BTreeMap<String, String>,
    ) -> Option<ProviderConfig> {
        settings.remove("enabled");
        settings.retain(|_, v| !v.trim().is_empty());

        if settings.is_empty() {
            return None;
        }

        let provider = settings
            .remove("provider")
            .map(|p| p.trim().to_ascii_lowercase())
            .unwrap_or_else(|| ProviderKind::default_for(channel).id().to_string());

        Some(ProviderConfig {
            id: None,
            site_id,
            channel,
            provider,
            settings: Json(settings),
            is_active: true,
            updated_at: Utc::now(),
            source: ConfigSource::Legacy,
        })
    }

    /// Fills optional settings the config does not set
    fn with_defaults(mut config: ProviderConfig, source: ConfigSource) -> ProviderConfig {
        config.source = source;

        for (key, value) in Self::defaults(config.channel, config.kind()) {
            let blank = config
                .settings
                .get(*key)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true);
            if blank {
                config.settings.insert(key.to_string(), value.to_string());
            }
        }

        config
    }

    /// Compiled-in optional settings per channel/provider
    pub fn defaults(
        channel: Channel,
        kind: Option<ProviderKind>,
    ) -> &'static [(&'static str, &'static str)] {
        match (channel, kind) {
            (Channel::Whatsapp, Some(ProviderKind::Meta)) => &[
                ("graph_api_version", "v21.0"),
                ("template_name", DEFAULT_TEMPLATE_NAME),
                ("template_language", DEFAULT_TEMPLATE_LANGUAGE),
                ("message_mode", "template"),
                ("default_country_code", "91"),
            ],
            (Channel::Whatsapp, _) | (Channel::Sms, _) => &[
                ("message_mode", "template"),
                ("default_country_code", "91"),
            ],
            (Channel::Email, _) => &[("from_name", "Admissions")],
        }
    }
}

/// Whether a channel is enabled for a site.
///
/// The legacy `{channel}_enabled` switch defaults to on.
pub async fn channel_enabled(
    store: &dyn RecordStore,
    site_id: i32,
    channel: Channel,
) -> AppResult<bool> {
    let prefix = format!("{}_", channel);
    let settings = store.legacy_settings(site_id, &prefix).await?;

    Ok(match settings.get("enabled").map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "0" | "false" | "no" | "off"),
        None => true,
    })
}
