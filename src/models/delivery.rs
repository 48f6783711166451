//! Delivery models: rendered messages, per-attempt results, per-channel
//! outcomes of a dispatch, and the append-only delivery log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::Channel;

// =============================================================================
// Rendered Message
// =============================================================================

/// Provider-ready message content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Pre-approved template with positional parameters
    Template {
        name: String,
        language: String,
        parameters: Vec<String>,
    },
    /// Freeform text
    Text { body: String },
    /// Email with HTML body and plain text alternative
    Email {
        subject: String,
        html: String,
        text: String,
    },
}

/// A message ready to hand to a channel sender (never persisted)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub channel: Channel,
    pub destination: String,
    pub content: MessageContent,
}

impl RenderedMessage {
    /// Template identifier, if this is a template message
    pub fn template_name(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Template { name, .. } => Some(name),
            _ => None,
        }
    }
}

// =============================================================================
// Error Classification
// =============================================================================

/// Classification of a delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed destination or missing required field
    Validation,
    /// Timeout, 5xx, rate limit
    Transient,
    /// Auth failure, rejected template, recipient refused by provider
    Permanent,
    /// DNS, TLS or connection failure
    Transport,
    /// The overall dispatch deadline expired before the channel finished
    DeadlineExceeded,
    /// Failure inside this service (record store, task panic)
    Internal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Transport)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Transport => "transport",
            ErrorClass::DeadlineExceeded => "deadline_exceeded",
            ErrorClass::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Classified delivery error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryError {
    pub class: ErrorClass,
    /// Provider error code, when the provider returned one
    pub code: Option<String>,
    pub message: String,
}

impl DeliveryError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]: {}", self.class, code, self.message),
            None => write!(f, "{}: {}", self.class, self.message),
        }
    }
}

// =============================================================================
// Delivery Result
// =============================================================================

/// Normalized result of one send attempt
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub channel: Channel,
    pub provider: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<DeliveryError>,
    pub http_status: Option<u16>,
    /// Raw provider response, kept for logging only
    #[serde(skip_serializing)]
    pub raw_response: Option<serde_json::Value>,
}

impl DeliveryResult {
    /// Creates a successful result
    pub fn sent(channel: Channel, provider: &str, message_id: Option<String>) -> Self {
        Self {
            channel,
            provider: provider.to_string(),
            success: true,
            message_id,
            error: None,
            http_status: None,
            raw_response: None,
        }
    }

    /// Creates a failed result
    pub fn failed(channel: Channel, provider: &str, error: DeliveryError) -> Self {
        Self {
            channel,
            provider: provider.to_string(),
            success: false,
            message_id: None,
            error: Some(error),
            http_status: None,
            raw_response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    /// Error class of a failed result
    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error.as_ref().map(|e| e.class)
    }
}

// =============================================================================
// Channel Outcome
// =============================================================================

/// Why a channel was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Channel disabled globally or for the site
    Disabled,
    /// No usable provider configuration
    NotConfigured,
    /// Delivery flag already set for this record
    AlreadySent,
    /// Another dispatch holds the claim on this channel
    InProgress,
    /// Provider resolved but no sender is registered for it
    NoSender,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::Disabled => "disabled",
            SkipReason::NotConfigured => "not_configured",
            SkipReason::AlreadySent => "already_sent",
            SkipReason::InProgress => "in_progress",
            SkipReason::NoSender => "no_sender",
        };
        f.write_str(s)
    }
}

/// Terminal state of one channel in a dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Sent {
        provider: String,
        message_id: Option<String>,
        attempts: u32,
    },
    Failed {
        provider: Option<String>,
        error: DeliveryError,
        attempts: u32,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ChannelOutcome::Sent { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ChannelOutcome::Skipped { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ChannelOutcome::Sent { attempts, .. } | ChannelOutcome::Failed { attempts, .. } => {
                *attempts
            }
            ChannelOutcome::Skipped { .. } => 0,
        }
    }
}

/// Per-channel outcomes of one dispatch
pub type DispatchReport = BTreeMap<Channel, ChannelOutcome>;

// =============================================================================
// Delivery Log
// =============================================================================

/// Status of a logged delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// One delivery attempt (append-only audit log)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub enquiry_id: i64,
    pub channel: Channel,
    pub provider: String,
    pub attempt: i32,
    pub status: DeliveryStatus,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub http_status: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Insert DTO for the delivery log
#[derive(Debug, Clone)]
pub struct NewDeliveryLogEntry {
    pub enquiry_id: i64,
    pub channel: Channel,
    pub provider: String,
    pub attempt: i32,
    pub status: DeliveryStatus,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub http_status: Option<i32>,
}

impl NewDeliveryLogEntry {
    pub fn from_result(enquiry_id: i64, attempt: u32, result: &DeliveryResult) -> Self {
        Self {
            enquiry_id,
            channel: result.channel,
            provider: result.provider.clone(),
            attempt: attempt as i32,
            status: if result.success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            error_class: result.error_class(),
            error_message: result.error.as_ref().map(|e| e.to_string()),
            provider_message_id: result.message_id.clone(),
            http_status: result.http_status.map(i32::from),
        }
    }
}
