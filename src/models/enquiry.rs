//! Enquiry models.
//!
//! An enquiry is created by the conversational form once a submission is
//! finalized. The dispatcher only ever flips its delivery flags; the admin
//! surface changes its status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::Channel;

// =============================================================================
// Enquiry Status Enum
// =============================================================================

/// Admission status of an enquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnquiryStatus {
    #[default]
    Pending,
    Contacted,
    Converted,
    Rejected,
}

impl std::fmt::Display for EnquiryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnquiryStatus::Pending => write!(f, "pending"),
            EnquiryStatus::Contacted => write!(f, "contacted"),
            EnquiryStatus::Converted => write!(f, "converted"),
            EnquiryStatus::Rejected => write!(f, "rejected"),
        }
    }
}

// =============================================================================
// Sync Status Enum
// =============================================================================

/// Latest known state of the MyClassBoard sync for an enquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Enquiry Record Model
// =============================================================================

/// A finalized admission enquiry
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EnquiryRecord {
    pub id: i64,
    pub site_id: i32,
    pub enquiry_number: String,
    /// Student/parent fields (student_name, parent_name, email, phone, grade, ...)
    pub fields: Json<BTreeMap<String, String>>,
    /// Marketing attribution (utm_*, gclid, fbclid, ...)
    pub attribution: Json<BTreeMap<String, String>>,
    pub status: EnquiryStatus,
    pub email_sent: bool,
    pub whatsapp_sent: bool,
    pub sms_sent: bool,
    pub sync_status: Option<SyncStatus>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnquiryRecord {
    /// Returns a non-empty, trimmed field value
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Parent name, falling back to the student name
    pub fn parent_name(&self) -> Option<&str> {
        self.field("parent_name").or_else(|| self.field("student_name"))
    }

    /// Current value of the delivery flag for a channel
    pub fn delivery_flag(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_sent,
            Channel::Whatsapp => self.whatsapp_sent,
            Channel::Sms => self.sms_sent,
        }
    }

    /// Raw destination for a channel (validated later by the sender)
    pub fn destination(&self, channel: Channel) -> String {
        let value = match channel {
            Channel::Email => self.field("email"),
            Channel::Whatsapp => self
                .field("whatsapp_number")
                .or_else(|| self.field("phone")),
            Channel::Sms => self.field("phone"),
        };
        value.unwrap_or_default().to_string()
    }
}

/// DTO handed in by the form collaborator once an enquiry is finalized
#[derive(Debug, Clone, Deserialize)]
pub struct NewEnquiry {
    pub site_id: i32,
    pub enquiry_number: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub attribution: BTreeMap<String, String>,
}

/// DTO for the admin status update
#[derive(Debug, Deserialize)]
pub struct UpdateEnquiryStatus {
    pub status: EnquiryStatus,
}
