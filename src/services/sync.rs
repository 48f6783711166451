//! MyClassBoard (MCB) sync adapter.
//!
//! Pushes an enquiry to the external student information system. Every
//! attempt is appended to the sync log; the enquiry's `sync_status` and
//! `external_id` follow the final attempt.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::McbConfig;
use crate::error::{AppError, AppResult};
use crate::models::{EnquiryRecord, NewSyncLogEntry, SyncLogEntry, SyncStatus};
use crate::services::notification::{classify_status, http_client, parse_body, TransportError};
use crate::services::retry::RetryPolicy;
use crate::store::{ClaimScope, DynStore, CLAIM_MARGIN};

const DEFAULT_SOURCE: &str = "website";

/// Resolved MCB endpoint and account for one site
#[derive(Debug, Clone, PartialEq)]
pub struct McbTarget {
    pub url: String,
    pub organisation_id: String,
    pub branch_id: Option<String>,
    pub api_key: Option<String>,
}

/// Result of one HTTP attempt
struct Attempt {
    success: bool,
    retryable: bool,
    http_status: Option<u16>,
    response: Option<Value>,
    error: Option<String>,
    external_id: Option<String>,
}

impl Attempt {
    fn failed(http_status: Option<u16>, response: Option<Value>, error: String, retryable: bool) -> Self {
        Self {
            success: false,
            retryable,
            http_status,
            response,
            error: Some(error),
            external_id: None,
        }
    }
}

#[derive(Clone)]
pub struct McbSyncAdapter {
    store: DynStore,
    client: reqwest::Client,
    mcb: Arc<McbConfig>,
    policy: RetryPolicy,
}

impl McbSyncAdapter {
    pub fn new(store: DynStore, mcb: &McbConfig, policy: RetryPolicy) -> Self {
        Self {
            store,
            client: http_client(mcb.timeout),
            mcb: Arc::new(mcb.clone()),
            policy,
        }
    }

    /// Syncs one enquiry and returns the last sync log entry written for it.
    ///
    /// An enquiry that is already synced is not sent again. While another
    /// sync of the same enquiry is running the call fails with a conflict.
    pub async fn sync_enquiry(&self, enquiry_id: i64) -> AppResult<SyncLogEntry> {
        let store = self.store.as_ref();
        let enquiry = store.get_enquiry(enquiry_id).await?;
        if let Some(entry) = self.already_synced(&enquiry).await? {
            return Ok(entry);
        }

        let claim = store
            .claim(enquiry_id, ClaimScope::Sync, self.claim_lease())
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("MCB sync of enquiry {} is in progress", enquiry_id))
            })?;

        let result = self.sync_claimed(enquiry_id).await;

        if let Err(e) = store.release(&claim).await {
            log::warn!("Failed to release sync claim on enquiry {}: {}", enquiry_id, e);
        }
        result
    }

    /// Latest successful sync entry when the enquiry is already synced
    async fn already_synced(&self, enquiry: &EnquiryRecord) -> AppResult<Option<SyncLogEntry>> {
        if enquiry.sync_status != Some(SyncStatus::Synced) {
            return Ok(None);
        }

        let previous = self
            .store
            .list_sync_log(enquiry.id)
            .await?
            .into_iter()
            .filter(|entry| entry.success)
            .max_by_key(|entry| entry.id);

        if previous.is_some() {
            log::debug!("Enquiry {} already synced to MCB", enquiry.id);
        }
        Ok(previous)
    }

    /// Covers every attempt with its timeout and the longest jittered backoff
    fn claim_lease(&self) -> Duration {
        let attempts = self.policy.max_attempts.max(1);
        (self.mcb.timeout + self.policy.max_delay.saturating_mul(2)).saturating_mul(attempts)
            + CLAIM_MARGIN
    }

    async fn sync_claimed(&self, enquiry_id: i64) -> AppResult<SyncLogEntry> {
        let store = self.store.as_ref();

        // Re-read under the claim; a sync that just finished may have set the status
        let enquiry = store.get_enquiry(enquiry_id).await?;
        if let Some(entry) = self.already_synced(&enquiry).await? {
            return Ok(entry);
        }

        let target = match self.target(enquiry.site_id).await? {
            Some(target) => target,
            None => {
                log::warn!(
                    "MCB sync is not configured for site {}, enquiry {} not synced",
                    enquiry.site_id,
                    enquiry_id
                );
                return store
                    .append_sync_log(NewSyncLogEntry {
                        enquiry_id,
                        error_message: Some("MCB sync is not configured".to_string()),
                        ..Default::default()
                    })
                    .await;
            }
        };

        let payload = Self::build_payload(&enquiry, &target);
        let idempotency_key = format!("{}-{}", enquiry.site_id, enquiry.id);

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.post(&target, &payload, &idempotency_key).await;

            let entry = store
                .append_sync_log(NewSyncLogEntry {
                    enquiry_id,
                    success: outcome.success,
                    error_message: outcome.error.clone(),
                    retry_count: attempt as i32,
                    request_payload: Some(payload.clone()),
                    response_payload: outcome.response,
                    http_status: outcome.http_status.map(i32::from),
                    external_id: outcome.external_id.clone(),
                })
                .await?;

            if outcome.success {
                store
                    .update_sync_status(enquiry_id, SyncStatus::Synced, outcome.external_id.as_deref())
                    .await?;
                log::info!(
                    "Enquiry {} synced to MCB (external id {:?})",
                    enquiry_id,
                    outcome.external_id
                );
                return Ok(entry);
            }

            attempt += 1;
            if !outcome.retryable || attempt >= self.policy.max_attempts {
                store
                    .update_sync_status(enquiry_id, SyncStatus::Failed, None)
                    .await?;
                log::warn!(
                    "MCB sync for enquiry {} failed after {} attempt(s): {}",
                    enquiry_id,
                    attempt,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                return Ok(entry);
            }

            let delay = self.policy.delay_after(attempt);
            log::debug!(
                "MCB sync attempt {} for enquiry {} failed, retrying in {:?}",
                attempt,
                enquiry_id,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Endpoint and account for a site: `mcb_*` site settings over environment config.
    ///
    /// None when there is no base URL or organisation id.
    pub async fn target(&self, site_id: i32) -> AppResult<Option<McbTarget>> {
        let site = self.store.legacy_settings(site_id, "mcb_").await?;

        let pick = |key: &str, fallback: Option<&String>| -> Option<String> {
            site.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| fallback.cloned())
        };

        let base_url = match pick("base_url", self.mcb.base_url.as_ref()) {
            Some(url) => url,
            None => return Ok(None),
        };
        let organisation_id = match pick("organisation_id", self.mcb.organisation_id.as_ref()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let path = pick("path", Some(&self.mcb.path)).unwrap_or_default();

        Ok(Some(McbTarget {
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            organisation_id,
            branch_id: pick("branch_id", self.mcb.branch_id.as_ref()),
            api_key: pick("api_key", self.mcb.api_key.as_ref()),
        }))
    }

    /// Maps an enquiry to the MCB enquiry payload
    pub fn build_payload(enquiry: &EnquiryRecord, target: &McbTarget) -> Value {
        let field = |name: &str| enquiry.field(name).unwrap_or_default();
        let attribution: &BTreeMap<String, String> = &enquiry.attribution;

        let source = attribution
            .get("utm_source")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE);

        json!({
            "organisationId": target.organisation_id,
            "branchId": target.branch_id.as_deref().unwrap_or_default(),
            "enquiryNo": enquiry.enquiry_number,
            "studentName": field("student_name"),
            "parentName": enquiry.parent_name().unwrap_or_default(),
            "mobileNo": field("phone"),
            "emailId": field("email"),
            "className": field("grade"),
            "board": field("board"),
            "dateOfBirth": enquiry
                .field("dob")
                .or_else(|| enquiry.field("date_of_birth"))
                .unwrap_or_default(),
            "address": field("address"),
            "source": source,
            "attribution": attribution,
        })
    }

    async fn post(&self, target: &McbTarget, payload: &Value, idempotency_key: &str) -> Attempt {
        let mut request = self
            .client
            .post(&target.url)
            .header("X-Idempotency-Key", idempotency_key)
            .json(payload);

        if let Some(api_key) = &target.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::failed(None, None, TransportError::from(e).to_string(), true),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(text) => parse_body(&text),
            Err(e) => {
                return Attempt::failed(
                    Some(status.as_u16()),
                    None,
                    TransportError::from(e).to_string(),
                    true,
                )
            }
        };

        if !status.is_success() {
            let retryable = classify_status(status.as_u16()).is_retryable();
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Attempt::failed(Some(status.as_u16()), Some(body), message, retryable);
        }

        if is_negative(&body) {
            let message = error_message(&body).unwrap_or_else(|| "MCB rejected the enquiry".to_string());
            return Attempt::failed(Some(status.as_u16()), Some(body), message, false);
        }

        Attempt {
            success: true,
            retryable: false,
            http_status: Some(status.as_u16()),
            external_id: external_id(&body),
            response: Some(body),
            error: None,
        }
    }
}

/// True when a 2xx body explicitly reports failure
fn is_negative(body: &Value) -> bool {
    body["status"] == Value::Bool(false)
        || body["success"] == Value::Bool(false)
        || body["status"]
            .as_str()
            .map(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed"))
            .unwrap_or(false)
}

fn error_message(body: &Value) -> Option<String> {
    ["message", "error", "errorMessage"]
        .iter()
        .find_map(|key| body[*key].as_str())
        .map(str::to_string)
}

/// External enquiry id from the first of `enquiryId`, `id`, `data.enquiryId`, `data.id`
fn external_id(body: &Value) -> Option<String> {
    [
        &body["enquiryId"],
        &body["id"],
        &body["data"]["enquiryId"],
        &body["data"]["id"],
    ]
    .into_iter()
    .find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
