use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::auth::AdminAuth;
use crate::error::{AppError, AppResult};
use crate::models::{Channel, ConfigSource, ProviderKind, SaveProviderConfig};
use crate::services::{channel_enabled, ProviderResolver, Resolution};
use crate::store::DynStore;

/// Effective provider for a channel, without credentials
#[derive(Serialize)]
pub struct ResolutionResponse {
    pub site_id: i32,
    pub channel: Channel,
    pub enabled: bool,
    pub configured: bool,
    pub provider: Option<String>,
    pub source: Option<ConfigSource>,
    pub reason: Option<String>,
}

fn parse_channel(raw: &str) -> AppResult<Channel> {
    raw.parse::<Channel>().map_err(AppError::Validation)
}

/// PUT /api/sites/{site_id}/providers/{channel} - Save a structured provider config
pub async fn save_provider(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<(i32, String)>,
    body: web::Json<SaveProviderConfig>,
) -> AppResult<HttpResponse> {
    let (site_id, channel) = path.into_inner();
    let channel = parse_channel(&channel)?;
    let mut input = body.into_inner();

    let kind = ProviderKind::from_id(&input.provider)
        .ok_or_else(|| AppError::Validation(format!("Unknown provider '{}'", input.provider)))?;

    if !kind.serves(channel) {
        return Err(AppError::Validation(format!(
            "Provider '{}' cannot send {}",
            kind, channel
        )));
    }
    input.provider = kind.id().to_string();

    let config = store.save_provider_config(site_id, channel, input).await?;
    log::info!(
        "Saved {} provider '{}' for site {} (active: {})",
        channel,
        config.provider,
        site_id,
        config.is_active
    );

    let missing = config.missing_settings();
    if config.is_active && !missing.is_empty() {
        log::warn!(
            "{} provider for site {} is missing {} and will not be used",
            channel,
            site_id,
            missing.join(", ")
        );
    }

    Ok(HttpResponse::Ok().json(config))
}

/// GET /api/sites/{site_id}/providers/{channel} - Show which provider a dispatch would use
pub async fn get_resolution(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<(i32, String)>,
) -> AppResult<HttpResponse> {
    let (site_id, channel) = path.into_inner();
    let channel = parse_channel(&channel)?;
    let store = store.get_ref().as_ref();

    let enabled = channel_enabled(store, site_id, channel).await?;
    let response = match ProviderResolver::resolve(store, site_id, channel).await? {
        Resolution::Resolved(config) => ResolutionResponse {
            site_id,
            channel,
            enabled,
            configured: true,
            provider: Some(config.provider),
            source: Some(config.source),
            reason: None,
        },
        Resolution::NotConfigured(reason) => ResolutionResponse {
            site_id,
            channel,
            enabled,
            configured: false,
            provider: None,
            source: None,
            reason: Some(reason),
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

/// PUT /api/sites/{site_id}/settings - Upsert legacy flat settings
///
/// Covers the `{channel}_*` fallback settings, the `{channel}_enabled`
/// switches and the per-site `mcb_*` overrides.
pub async fn save_settings(
    _auth: AdminAuth,
    store: web::Data<DynStore>,
    path: web::Path<i32>,
    body: web::Json<BTreeMap<String, String>>,
) -> AppResult<HttpResponse> {
    let site_id = path.into_inner();
    let settings = body.into_inner();

    if let Some(key) = settings.keys().find(|k| k.trim().is_empty()) {
        return Err(AppError::Validation(format!("Invalid setting key '{}'", key)));
    }

    for (key, value) in &settings {
        store.set_legacy_setting(site_id, key.trim(), value).await?;
    }

    log::info!("Saved {} setting(s) for site {}", settings.len(), site_id);
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/sites/{site_id}")
            .route("/providers/{channel}", web::put().to(save_provider))
            .route("/providers/{channel}", web::get().to(get_resolution))
            .route("/settings", web::put().to(save_settings)),
    );
}
