//! Dispatcher — delivers notifications with bounded retry.
//!
//! Per notification: `Pending → {Delivered, Failed}`, looping on `Pending`
//! only for transient failures and at most `max_attempts` times in total.
//! Notifications are independent; one destination failing never prevents
//! another from being attempted.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::pipeline::types::{ChatChannel, DeliveryOutcome, Notification};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), without jitter.
    ///
    /// A server-provided `retry_after` replaces the computed delay. Both are
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = retry_after.unwrap_or_else(|| {
            let exp = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1u32 << exp)
        });
        delay.min(self.max_delay)
    }
}

/// Random extra delay of up to half the computed backoff.
fn jitter(delay: Duration) -> Duration {
    let half = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if half == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}

/// Delivers notifications through a chat channel.
pub struct Dispatcher {
    channel: Arc<dyn ChatChannel>,
    policy: RetryPolicy,
    post_timeout: Duration,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// `max_in_flight` bounds concurrent posts across all callers.
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        policy: RetryPolicy,
        post_timeout: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            channel,
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            post_timeout,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver one notification, retrying transient failures.
    pub async fn dispatch(&self, notification: &Notification) -> DeliveryOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.attempt(notification).await {
                Ok(()) => {
                    debug!(
                        id = %notification.message_id,
                        destination = %notification.destination,
                        attempt,
                        "Notification delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(error) if error.is_transient() && attempt < self.policy.max_attempts => {
                    let retry_after = error.retry_after();
                    let mut delay = self.policy.backoff(attempt, retry_after);
                    if retry_after.is_none() {
                        delay += jitter(delay);
                    }
                    warn!(
                        id = %notification.message_id,
                        destination = %notification.destination,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Transient delivery failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(
                        id = %notification.message_id,
                        destination = %notification.destination,
                        attempt,
                        transient = error.is_transient(),
                        error = %error,
                        "Notification delivery failed"
                    );
                    return DeliveryOutcome::Failed {
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// One post, bounded by the per-post timeout and the in-flight limit.
    async fn attempt(&self, notification: &Notification) -> Result<(), ChannelError> {
        let _permit = self.permits.acquire().await.ok();
        match tokio::time::timeout(self.post_timeout, self.channel.post(notification)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.post_timeout)),
        }
    }
}
