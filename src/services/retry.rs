use std::time::Duration;

use crate::config::{McbConfig, NotificationConfig};

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempt` attempts have failed (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return delay;
        }

        delay + delay.mul_f64(self.jitter.min(1.0) * rand::random::<f64>())
    }

    /// Sum of the backoff delays of a full retry cycle, ignoring jitter
    pub fn total_backoff(&self) -> Duration {
        let policy = Self {
            jitter: 0.0,
            ..*self
        };
        (1..self.max_attempts).map(|a| policy.delay_after(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NotificationConfig::default())
    }
}

impl From<&NotificationConfig> for RetryPolicy {
    fn from(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.backoff_base,
            max_delay: config.backoff_max,
            jitter: config.backoff_jitter,
        }
    }
}

impl RetryPolicy {
    /// MCB sync shares the notification backoff shape with its own attempt budget
    pub fn for_sync(notification: &NotificationConfig, mcb: &McbConfig) -> Self {
        Self {
            max_attempts: mcb.max_attempts.max(1),
            ..Self::from(notification)
        }
    }
}
