//! In-process record store.
//!
//! Mirrors the PostgreSQL semantics (monotonic per-column flags, latest
//! active provider config wins, append-only logs) without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Claim, ClaimScope, RecordStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Channel, DeliveryLogEntry, EnquiryRecord, EnquiryStatus, NewDeliveryLogEntry, NewEnquiry,
    NewSyncLogEntry, ProviderConfig, SaveProviderConfig, SyncLogEntry, SyncStatus,
};

#[derive(Default)]
struct State {
    next_id: i64,
    enquiries: BTreeMap<i64, EnquiryRecord>,
    provider_configs: Vec<ProviderConfig>,
    legacy_settings: BTreeMap<(i32, String), String>,
    delivery_log: Vec<DeliveryLogEntry>,
    sync_log: Vec<SyncLogEntry>,
    claims: HashMap<(i64, ClaimScope), DateTime<Utc>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn enquiry_mut(&mut self, id: i64) -> AppResult<&mut EnquiryRecord> {
        self.enquiries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Enquiry {} not found", id)))
    }
}

/// Record store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("Memory store state poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn ping(&self) -> bool {
        self.state.lock().is_ok()
    }

    async fn create_enquiry(&self, input: NewEnquiry) -> AppResult<EnquiryRecord> {
        let number = input.enquiry_number.trim().to_string();
        if number.is_empty() {
            return Err(AppError::Validation(
                "Enquiry number is required".to_string(),
            ));
        }

        let mut state = self.state()?;

        let duplicate = state
            .enquiries
            .values()
            .any(|e| e.site_id == input.site_id && e.enquiry_number == number);
        if duplicate {
            return Err(AppError::Conflict(format!(
                "Enquiry {} already exists for site {}",
                number, input.site_id
            )));
        }

        let now = Utc::now();
        let enquiry = EnquiryRecord {
            id: state.next_id(),
            site_id: input.site_id,
            enquiry_number: number,
            fields: Json(input.fields),
            attribution: Json(input.attribution),
            status: EnquiryStatus::Pending,
            email_sent: false,
            whatsapp_sent: false,
            sms_sent: false,
            sync_status: None,
            external_id: None,
            created_at: now,
            updated_at: now,
        };

        state.enquiries.insert(enquiry.id, enquiry.clone());
        Ok(enquiry)
    }

    async fn get_enquiry(&self, id: i64) -> AppResult<EnquiryRecord> {
        let mut state = self.state()?;
        state.enquiry_mut(id).map(|e| e.clone())
    }

    async fn update_status(&self, id: i64, status: EnquiryStatus) -> AppResult<EnquiryRecord> {
        let mut state = self.state()?;
        let enquiry = state.enquiry_mut(id)?;
        enquiry.status = status;
        enquiry.updated_at = Utc::now();
        Ok(enquiry.clone())
    }

    async fn delivery_flag(&self, id: i64, channel: Channel) -> AppResult<bool> {
        let mut state = self.state()?;
        Ok(state.enquiry_mut(id)?.delivery_flag(channel))
    }

    async fn update_delivery_flag(&self, id: i64, channel: Channel, sent: bool) -> AppResult<bool> {
        let mut state = self.state()?;
        let enquiry = state.enquiry_mut(id)?;

        if !sent || enquiry.delivery_flag(channel) {
            return Ok(false);
        }

        match channel {
            Channel::Email => enquiry.email_sent = true,
            Channel::Whatsapp => enquiry.whatsapp_sent = true,
            Channel::Sms => enquiry.sms_sent = true,
        }
        enquiry.updated_at = Utc::now();
        Ok(true)
    }

    async fn claim(
        &self,
        id: i64,
        scope: ClaimScope,
        lease: Duration,
    ) -> AppResult<Option<Claim>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|_| AppError::Internal(format!("Claim lease {:?} is out of range", lease)))?;
        let now = Utc::now();
        let mut state = self.state()?;

        // Only live claims stay in the map
        state.claims.retain(|_, expires_at| *expires_at > now);
        if state.claims.contains_key(&(id, scope)) {
            return Ok(None);
        }

        let expires_at = now + lease;
        state.claims.insert((id, scope), expires_at);
        Ok(Some(Claim {
            enquiry_id: id,
            scope,
            expires_at,
        }))
    }

    async fn release(&self, claim: &Claim) -> AppResult<()> {
        let mut state = self.state()?;
        let key = (claim.enquiry_id, claim.scope);
        if state.claims.get(&key) == Some(&claim.expires_at) {
            state.claims.remove(&key);
        }
        Ok(())
    }

    async fn update_sync_status(
        &self,
        id: i64,
        status: SyncStatus,
        external_id: Option<&str>,
    ) -> AppResult<()> {
        let mut state = self.state()?;
        let enquiry = state.enquiry_mut(id)?;
        enquiry.sync_status = Some(status);
        if let Some(external_id) = external_id {
            enquiry.external_id = Some(external_id.to_string());
        }
        enquiry.updated_at = Utc::now();
        Ok(())
    }

    async fn active_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
    ) -> AppResult<Option<ProviderConfig>> {
        let state = self.state()?;

        let config = state
            .provider_configs
            .iter()
            .filter(|c| c.site_id == site_id && c.channel == channel && c.is_active)
            .max_by_key(|c| (c.updated_at, c.id))
            .cloned();

        Ok(config)
    }

    async fn save_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
        input: SaveProviderConfig,
    ) -> AppResult<ProviderConfig> {
        let mut state = self.state()?;

        if !input.is_active {
            for config in state
                .provider_configs
                .iter_mut()
                .filter(|c| c.site_id == site_id && c.channel == channel)
            {
                config.is_active = false;
            }
        }

        let config = ProviderConfig {
            id: Some(state.next_id()),
            site_id,
            channel,
            provider: input.provider.trim().to_ascii_lowercase(),
            settings: Json(input.settings),
            is_active: input.is_active,
            updated_at: Utc::now(),
            source: Default::default(),
        };

        state.provider_configs.push(config.clone());
        Ok(config)
    }

    async fn legacy_settings(
        &self,
        site_id: i32,
        prefix: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        let state = self.state()?;

        Ok(state
            .legacy_settings
            .iter()
            .filter(|((site, key), _)| *site == site_id && key.starts_with(prefix))
            .map(|((_, key), value)| (key[prefix.len()..].to_string(), value.clone()))
            .collect())
    }

    async fn set_legacy_setting(&self, site_id: i32, key: &str, value: &str) -> AppResult<()> {
        let mut state = self.state()?;
        state
            .legacy_settings
            .insert((site_id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn append_delivery_log(
        &self,
        entry: NewDeliveryLogEntry,
    ) -> AppResult<DeliveryLogEntry> {
        let mut state = self.state()?;

        let row = DeliveryLogEntry {
            id: state.next_id(),
            enquiry_id: entry.enquiry_id,
            channel: entry.channel,
            provider: entry.provider,
            attempt: entry.attempt,
            status: entry.status,
            error_class: entry.error_class,
            error_message: entry.error_message,
            provider_message_id: entry.provider_message_id,
            http_status: entry.http_status,
            created_at: Utc::now(),
        };

        state.delivery_log.push(row.clone());
        Ok(row)
    }

    async fn list_delivery_log(&self, enquiry_id: i64) -> AppResult<Vec<DeliveryLogEntry>> {
        let state = self.state()?;
        Ok(state
            .delivery_log
            .iter()
            .filter(|e| e.enquiry_id == enquiry_id)
            .cloned()
            .collect())
    }

    async fn append_sync_log(&self, entry: NewSyncLogEntry) -> AppResult<SyncLogEntry> {
        let mut state = self.state()?;

        let row = SyncLogEntry {
            id: state.next_id(),
            enquiry_id: entry.enquiry_id,
            success: entry.success,
            error_message: entry.error_message,
            retry_count: entry.retry_count,
            request_payload: entry.request_payload,
            response_payload: entry.response_payload,
            http_status: entry.http_status,
            external_id: entry.external_id,
            created_at: Utc::now(),
        };

        state.sync_log.push(row.clone());
        Ok(row)
    }

    async fn list_sync_log(&self, enquiry_id: i64) -> AppResult<Vec<SyncLogEntry>> {
        let state = self.state()?;
        Ok(state
            .sync_log
            .iter()
            .filter(|e| e.enquiry_id == enquiry_id)
            .cloned()
            .collect())
    }
}
