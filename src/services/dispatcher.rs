//! Notification dispatcher.
//!
//! Delivers the confirmation for one enquiry on every channel. Each channel
//! runs on its own task through the same steps:
//!
//! 1. enabled check (global list, then the site's `{channel}_enabled` switch)
//! 2. per-(enquiry, channel) claim and a fresh read of the delivery flag
//! 3. provider resolution and sender lookup
//! 4. rendering
//! 5. sending with bounded retries, one delivery log entry per attempt
//!
//! A channel ends Sent, Failed or Skipped. Channels that have not finished
//! when the dispatch deadline expires are aborted and reported as failed.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::NotificationConfig;
use crate::error::AppResult;
use crate::models::{
    Channel, ChannelOutcome, DeliveryError, DeliveryResult, DispatchReport, EnquiryRecord,
    ErrorClass, NewDeliveryLogEntry, SkipReason,
};
use crate::services::notification::SenderRegistry;
use crate::services::renderer::MessageRenderer;
use crate::services::resolver::{channel_enabled, ProviderResolver, Resolution};
use crate::services::retry::RetryPolicy;
use crate::store::{Claim, ClaimScope, DynStore, CLAIM_MARGIN};

/// What a channel task has done so far, readable after it is aborted
#[derive(Debug, Default)]
struct Progress {
    provider: Option<String>,
    attempts: u32,
    claim: Option<Claim>,
}

type SharedProgress = Arc<Mutex<Progress>>;

fn snapshot(progress: &SharedProgress) -> (Option<String>, u32) {
    match progress.lock() {
        Ok(p) => (p.provider.clone(), p.attempts),
        Err(poisoned) => {
            let p = poisoned.into_inner();
            (p.provider.clone(), p.attempts)
        }
    }
}

fn record(progress: &SharedProgress, update: impl FnOnce(&mut Progress)) {
    if let Ok(mut p) = progress.lock() {
        update(&mut p);
    }
}

fn take_claim(progress: &SharedProgress) -> Option<Claim> {
    match progress.lock() {
        Ok(mut p) => p.claim.take(),
        Err(poisoned) => poisoned.into_inner().claim.take(),
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: DynStore,
    senders: Arc<SenderRegistry>,
    policy: RetryPolicy,
    deadline: Duration,
    enabled_channels: Arc<Vec<Channel>>,
}

impl NotificationDispatcher {
    pub fn new(store: DynStore, senders: SenderRegistry, config: &NotificationConfig) -> Self {
        Self {
            store,
            senders: Arc::new(senders),
            policy: RetryPolicy::from(config),
            deadline: config.dispatch_deadline,
            enabled_channels: Arc::new(config.enabled_channels.clone()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Long enough to outlive the dispatch deadline
    fn claim_lease(&self) -> Duration {
        self.deadline + CLAIM_MARGIN
    }

    async fn release(&self, claim: &Claim) {
        if let Err(e) = self.store.release(claim).await {
            log::warn!(
                "Failed to release {} claim on enquiry {}: {}",
                claim.scope,
                claim.enquiry_id,
                e
            );
        }
    }

    /// Loads the enquiry and dispatches it.
    ///
    /// Only a missing enquiry (or a failure loading it) is an error; every
    /// per-channel problem ends up in the report.
    pub async fn dispatch(&self, enquiry_id: i64) -> AppResult<DispatchReport> {
        let enquiry = self.store.get_enquiry(enquiry_id).await?;
        Ok(self.dispatch_record(&enquiry).await)
    }

    /// Dispatches all channels of an already-loaded enquiry concurrently
    pub async fn dispatch_record(&self, enquiry: &EnquiryRecord) -> DispatchReport {
        let deadline = Instant::now() + self.deadline;
        let enquiry = Arc::new(enquiry.clone());

        let tasks: Vec<_> = Channel::ALL
            .into_iter()
            .map(|channel| {
                let this = self.clone();
                let enquiry = Arc::clone(&enquiry);
                let progress = SharedProgress::default();
                let task_progress = Arc::clone(&progress);

                let handle = tokio::spawn(async move {
                    this.run_channel(channel, &enquiry, &task_progress).await
                });
                (channel, handle, progress)
            })
            .collect();

        let outcomes = join_all(tasks.into_iter().map(|(channel, handle, progress)| {
            self.await_channel(channel, handle, progress, deadline, enquiry.id)
        }))
        .await;
        let report: DispatchReport = Channel::ALL.into_iter().zip(outcomes).collect();

        let sent = report.values().filter(|o| o.is_sent()).count();
        log::info!(
            "Dispatched enquiry {} ({}): {} of {} channel(s) sent",
            enquiry.id,
            enquiry.enquiry_number,
            sent,
            report.len()
        );

        report
    }

    /// Waits for a channel task until the deadline, aborting it when the deadline passes
    async fn await_channel(
        &self,
        channel: Channel,
        mut handle: JoinHandle<ChannelOutcome>,
        progress: SharedProgress,
        deadline: Instant,
        enquiry_id: i64,
    ) -> ChannelOutcome {
        let result = tokio::time::timeout_at(deadline, &mut handle).await;
        if result.is_err() {
            handle.abort();
            // Wait for the cancellation so the task cannot touch the claim afterwards
            let _ = handle.await;
        }
        if let Some(claim) = take_claim(&progress) {
            self.release(&claim).await;
        }

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                log::error!(
                    "{} task for enquiry {} did not complete: {}",
                    channel,
                    enquiry_id,
                    e
                );
                let (provider, attempts) = snapshot(&progress);
                ChannelOutcome::Failed {
                    provider,
                    error: DeliveryError::new(
                        ErrorClass::Internal,
                        format!("channel task failed: {}", e),
                    ),
                    attempts,
                }
            }
            Err(_) => {
                let (provider, attempts) = snapshot(&progress);
                log::warn!(
                    "{} delivery for enquiry {} exceeded the {:?} deadline after {} attempt(s)",
                    channel,
                    enquiry_id,
                    self.deadline,
                    attempts
                );
                ChannelOutcome::Failed {
                    provider,
                    error: DeliveryError::new(
                        ErrorClass::DeadlineExceeded,
                        "dispatch deadline exceeded",
                    ),
                    attempts,
                }
            }
        }
    }

    /// Runs one channel to a terminal outcome; store errors become internal failures
    async fn run_channel(
        &self,
        channel: Channel,
        enquiry: &EnquiryRecord,
        progress: &SharedProgress,
    ) -> ChannelOutcome {
        match self.deliver(channel, enquiry, progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "{} delivery for enquiry {} failed internally: {}",
                    channel,
                    enquiry.id,
                    e
                );
                let (provider, attempts) = snapshot(progress);
                ChannelOutcome::Failed {
                    provider,
                    error: DeliveryError::new(ErrorClass::Internal, e.to_string()),
                    attempts,
                }
            }
        }
    }

    async fn deliver(
        &self,
        channel: Channel,
        enquiry: &EnquiryRecord,
        progress: &SharedProgress,
    ) -> AppResult<ChannelOutcome> {
        let store = self.store.as_ref();

        if !self.enabled_channels.contains(&channel)
            || !channel_enabled(store, enquiry.site_id, channel).await?
        {
            log::debug!("{} disabled for site {}", channel, enquiry.site_id);
            return Ok(skipped(SkipReason::Disabled));
        }

        // Flags only ever go from false to true, so a stale true is still true
        if enquiry.delivery_flag(channel) {
            return Ok(skipped(SkipReason::AlreadySent));
        }

        let scope = ClaimScope::Delivery(channel);
        let claim = match store.claim(enquiry.id, scope, self.claim_lease()).await? {
            Some(claim) => claim,
            None if store.delivery_flag(enquiry.id, channel).await? => {
                return Ok(skipped(SkipReason::AlreadySent));
            }
            None => {
                log::debug!(
                    "{} delivery for enquiry {} is already in progress, skipping",
                    channel,
                    enquiry.id
                );
                return Ok(skipped(SkipReason::InProgress));
            }
        };
        record(progress, |p| p.claim = Some(claim.clone()));

        let outcome = self.deliver_claimed(channel, enquiry, progress).await;

        if let Some(claim) = take_claim(progress) {
            self.release(&claim).await;
        }
        outcome
    }

    /// Sends one channel while holding its claim
    async fn deliver_claimed(
        &self,
        channel: Channel,
        enquiry: &EnquiryRecord,
        progress: &SharedProgress,
    ) -> AppResult<ChannelOutcome> {
        let store = self.store.as_ref();

        if store.delivery_flag(enquiry.id, channel).await? {
            log::debug!(
                "{} already sent for enquiry {}, skipping",
                channel,
                enquiry.id
            );
            return Ok(skipped(SkipReason::AlreadySent));
        }

        let config = match ProviderResolver::resolve(store, enquiry.site_id, channel).await? {
            Resolution::Resolved(config) => config,
            Resolution::NotConfigured(_) => return Ok(skipped(SkipReason::NotConfigured)),
        };

        let sender = match self.senders.get(channel, &config.provider) {
            Some(sender) => sender,
            None => {
                log::warn!(
                    "No {} sender registered for provider '{}'",
                    channel,
                    config.provider
                );
                return Ok(skipped(SkipReason::NoSender));
            }
        };
        record(progress, |p| p.provider = Some(config.provider.clone()));

        let message = MessageRenderer::render(channel, &config, enquiry);
        log::debug!(
            "Rendered {} message for enquiry {} via {}",
            channel,
            enquiry.id,
            config.provider
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            record(progress, |p| p.attempts = attempt);

            let result = match sender.send(&message, &config).await {
                Ok(result) => result,
                Err(e) => DeliveryResult::failed(
                    channel,
                    sender.provider(),
                    DeliveryError::new(ErrorClass::Transport, e.to_string()),
                ),
            };

            let entry = NewDeliveryLogEntry::from_result(enquiry.id, attempt, &result);
            if let Err(e) = store.append_delivery_log(entry).await {
                log::error!(
                    "Failed to record {} attempt {} for enquiry {}: {}",
                    channel,
                    attempt,
                    enquiry.id,
                    e
                );
            }

            if result.success {
                store.update_delivery_flag(enquiry.id, channel, true).await?;
                log::info!(
                    "{} sent for enquiry {} via {} (attempt {})",
                    channel,
                    enquiry.id,
                    result.provider,
                    attempt
                );
                return Ok(ChannelOutcome::Sent {
                    provider: result.provider,
                    message_id: result.message_id,
                    attempts: attempt,
                });
            }

            let error = result.error.unwrap_or_else(|| {
                DeliveryError::new(ErrorClass::Transient, "provider reported failure without details")
            });

            if !error.class.is_retryable() || attempt >= self.policy.max_attempts {
                log::warn!(
                    "{} delivery for enquiry {} failed after {} attempt(s): {}",
                    channel,
                    enquiry.id,
                    attempt,
                    error
                );
                return Ok(ChannelOutcome::Failed {
                    provider: Some(result.provider),
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.policy.delay_after(attempt);
            log::debug!(
                "{} attempt {} for enquiry {} failed ({}), retrying in {:?}",
                channel,
                attempt,
                enquiry.id,
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn skipped(reason: SkipReason) -> ChannelOutcome {
    ChannelOutcome::Skipped { reason }
}
