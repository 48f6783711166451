//! Record store abstraction.
//!
//! The dispatcher and sync adapter only need a handful of record operations,
//! so persistence sits behind the `RecordStore` trait:
//! - `PgStore` backs it with PostgreSQL (production)
//! - `MemoryStore` keeps everything in process (tests, local runs)

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppResult;
use crate::models::{
    Channel, DeliveryLogEntry, EnquiryRecord, EnquiryStatus, NewDeliveryLogEntry, NewEnquiry,
    NewSyncLogEntry, ProviderConfig, SaveProviderConfig, SyncLogEntry, SyncStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Shared handle to the configured store
pub type DynStore = Arc<dyn RecordStore>;

/// Extra lease time on top of the longest expected hold of a claim
pub const CLAIM_MARGIN: Duration = Duration::from_secs(30);

/// Part of a record that a claim covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimScope {
    /// Delivery on one channel
    Delivery(Channel),
    /// Push to MCB
    Sync,
}

impl ClaimScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimScope::Delivery(channel) => channel.as_str(),
            ClaimScope::Sync => "sync",
        }
    }
}

impl std::fmt::Display for ClaimScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive, time-limited claim on one scope of a record.
///
/// No connection or lock is held while a claim is out. It ends when released
/// or once `expires_at` has passed, whichever comes first.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub enquiry_id: i64,
    pub scope: ClaimScope,
    pub expires_at: DateTime<Utc>,
}

/// Persistence operations consumed by the dispatcher, the sync adapter and the API
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns true when the backing store is reachable
    async fn ping(&self) -> bool;

    // =========================================================================
    // Enquiries
    // =========================================================================

    async fn create_enquiry(&self, input: NewEnquiry) -> AppResult<EnquiryRecord>;

    async fn get_enquiry(&self, id: i64) -> AppResult<EnquiryRecord>;

    async fn update_status(&self, id: i64, status: EnquiryStatus) -> AppResult<EnquiryRecord>;

    /// Fresh read of one delivery flag
    async fn delivery_flag(&self, id: i64, channel: Channel) -> AppResult<bool>;

    /// Sets one delivery flag without touching the other columns.
    ///
    /// Flags are monotonic: `sent = false` never resets a flag. Returns true
    /// only when this call flipped the flag from false to true.
    async fn update_delivery_flag(&self, id: i64, channel: Channel, sent: bool) -> AppResult<bool>;

    /// Claims `scope` of a record for `lease`.
    ///
    /// Returns `None` while another unexpired claim holds the same scope.
    async fn claim(&self, id: i64, scope: ClaimScope, lease: Duration)
        -> AppResult<Option<Claim>>;

    /// Ends a claim. A claim that expired and was taken over is left alone.
    async fn release(&self, claim: &Claim) -> AppResult<()>;

    async fn update_sync_status(
        &self,
        id: i64,
        status: SyncStatus,
        external_id: Option<&str>,
    ) -> AppResult<()>;

    // =========================================================================
    // Provider configuration
    // =========================================================================

    /// Most recently updated active structured config for (site, channel)
    async fn active_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
    ) -> AppResult<Option<ProviderConfig>>;

    async fn save_provider_config(
        &self,
        site_id: i32,
        channel: Channel,
        input: SaveProviderConfig,
    ) -> AppResult<ProviderConfig>;

    /// Legacy flat settings whose key starts with `prefix`, returned with the prefix stripped
    async fn legacy_settings(&self, site_id: i32, prefix: &str)
        -> AppResult<BTreeMap<String, String>>;

    async fn set_legacy_setting(&self, site_id: i32, key: &str, value: &str) -> AppResult<()>;

    // =========================================================================
    // Append-only logs
    // =========================================================================

    async fn append_delivery_log(&self, entry: NewDeliveryLogEntry)
        -> AppResult<DeliveryLogEntry>;

    async fn list_delivery_log(&self, enquiry_id: i64) -> AppResult<Vec<DeliveryLogEntry>>;

    async fn append_sync_log(&self, entry: NewSyncLogEntry) -> AppResult<SyncLogEntry>;

    async fn list_sync_log(&self, enquiry_id: i64) -> AppResult<Vec<SyncLogEntry>>;
}
