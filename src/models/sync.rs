use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One MyClassBoard sync attempt (append-only, never updated)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SyncLogEntry {
    pub id: i64,
    pub enquiry_id: i64,
    pub success: bool,
    pub error_message: Option<String>,
    /// Zero-based attempt index within one sync call
    pub retry_count: i32,
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
    pub http_status: Option<i32>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert DTO for the sync log
#[derive(Debug, Clone, Default)]
pub struct NewSyncLogEntry {
    pub enquiry_id: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
    pub http_status: Option<i32>,
    pub external_id: Option<String>,
}
