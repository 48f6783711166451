//! Scripted channel sender for dispatcher tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use admitflow::models::{
    Channel, DeliveryError, DeliveryResult, ErrorClass, ProviderConfig, RenderedMessage,
};
use admitflow::services::{ChannelSender, TransportError};

/// What the mock answers to one send
#[derive(Debug, Clone)]
pub enum Reply {
    Sent(&'static str),
    Fail(ErrorClass),
    Transport,
    /// Never answers
    Hang,
}

/// Sender that replays scripted replies, then repeats the fallback reply
pub struct MockSender {
    channel: Channel,
    provider: String,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    messages: Mutex<Vec<RenderedMessage>>,
}

impl MockSender {
    pub fn new(channel: Channel, provider: &str, fallback: Reply) -> Self {
        Self {
            channel,
            provider: provider.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Replies used before the fallback, in order
    pub fn with_script(self, replies: Vec<Reply>) -> Self {
        *self.script.lock().unwrap() = replies.into();
        self
    }

    /// Waits before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<RenderedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for MockSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        _config: &ProviderConfig,
    ) -> Result<DeliveryResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(message.clone());

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Sent(id) => Ok(DeliveryResult::sent(
                self.channel,
                &self.provider,
                Some(id.to_string()),
            )),
            Reply::Fail(class) => Ok(DeliveryResult::failed(
                self.channel,
                &self.provider,
                DeliveryError::new(class, format!("scripted {} failure", class)),
            )),
            Reply::Transport => Err(TransportError::Connect("connection refused".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }
}
