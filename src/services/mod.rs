pub mod dispatcher;
pub mod notification;
pub mod renderer;
pub mod resolver;
pub mod retry;
pub mod sync;

pub use dispatcher::NotificationDispatcher;
pub use notification::{ChannelSender, SenderRegistry, TransportError};
pub use renderer::MessageRenderer;
pub use resolver::{channel_enabled, ProviderResolver, Resolution};
pub use retry::RetryPolicy;
pub use sync::{McbSyncAdapter, McbTarget};
