pub mod channel;
pub mod delivery;
pub mod enquiry;
pub mod provider;
pub mod sync;

pub use channel::Channel;
pub use delivery::{
    ChannelOutcome, DeliveryError, DeliveryLogEntry, DeliveryResult, DeliveryStatus,
    DispatchReport, ErrorClass, MessageContent, NewDeliveryLogEntry, RenderedMessage, SkipReason,
};
pub use enquiry::{EnquiryRecord, EnquiryStatus, NewEnquiry, SyncStatus, UpdateEnquiryStatus};
pub use provider::{ConfigSource, ProviderConfig, ProviderKind, SaveProviderConfig};
pub use sync::{NewSyncLogEntry, SyncLogEntry};
