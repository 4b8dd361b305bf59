//! Relay run — one pass of fetch → classify → build → dispatch → mark.
//!
//! Fatal errors (state load, fetch, auth) abort before the processed set is
//! touched. Delivery failures are scoped to their (message, destination)
//! pair and only keep that message unmarked.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::classifier::classify;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::fetcher;
use crate::pipeline::notification::build_all;
use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::{
    CandidateMessage, DeliveryOutcome, Destination, Mailbox, MessageId,
};
use crate::store::{ProcessedStore, StateTracker};

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Messages processed concurrently.
    pub max_concurrency: usize,
    /// Messages not started before this budget elapses are deferred.
    pub run_budget: Option<Duration>,
    /// Processed entries older than this are pruned on flush.
    pub retention: Option<chrono::Duration>,
    /// Also flag completed messages as read in the mailbox.
    pub mark_seen: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            run_budget: None,
            retention: None,
            mark_seen: false,
        }
    }
}

/// One delivery that ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelivery {
    pub message_id: MessageId,
    pub subject: String,
    /// Redacted destination.
    pub destination: String,
    pub reason: String,
    pub attempts: u32,
}

/// Counts and failures for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidates returned by the fetcher.
    pub fetched: usize,
    /// Messages classified and dispatched.
    pub classified: usize,
    /// Notifications delivered.
    pub delivered: usize,
    /// Notifications that ended in failure.
    pub failed: usize,
    /// Messages marked complete.
    pub completed: usize,
    /// Messages skipped because the run budget ran out.
    pub deferred: usize,
    /// Messages routed to the default destination.
    pub fallback: usize,
    pub failures: Vec<FailedDelivery>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} classified={} delivered={} failed={} completed={} deferred={}",
            self.fetched, self.classified, self.delivered, self.failed, self.completed, self.deferred
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  failed: message {} ({:?}) -> {} after {} attempt(s): {}",
                failure.message_id,
                failure.subject,
                failure.destination,
                failure.attempts,
                failure.reason
            )?;
        }
        Ok(())
    }
}

/// What happened to one message during a run.
#[derive(Debug)]
struct MessageReport {
    id: MessageId,
    subject: String,
    fallback: bool,
    deliveries: Vec<(Destination, DeliveryOutcome)>,
    deferred: bool,
}

impl MessageReport {
    fn is_complete(&self) -> bool {
        !self.deferred && self.deliveries.iter().all(|(_, o)| o.is_delivered())
    }
}

/// The relay: wires the rule set to its collaborators.
pub struct Relay {
    rules: RuleSet,
    mailbox: Arc<dyn Mailbox>,
    dispatcher: Dispatcher,
    store: Arc<dyn ProcessedStore>,
    settings: RunSettings,
}

impl Relay {
    pub fn new(
        rules: RuleSet,
        mailbox: Arc<dyn Mailbox>,
        dispatcher: Dispatcher,
        store: Arc<dyn ProcessedStore>,
        settings: RunSettings,
    ) -> Self {
        Self {
            rules,
            mailbox,
            dispatcher,
            store,
            settings,
        }
    }

    /// Execute one run.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.run_inner()
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self) -> Result<RunSummary> {
        let deadline = self.settings.run_budget.map(|b| Instant::now() + b);
        info!(
            rules = self.rules.len(),
            mailbox = self.mailbox.name(),
            max_attempts = self.dispatcher.policy().max_attempts,
            "Starting relay run"
        );

        let mut tracker = StateTracker::load(Arc::clone(&self.store)).await?;
        let messages = fetcher::fetch(self.mailbox.as_ref(), tracker.processed()).await?;

        let reports: Vec<MessageReport> = futures::stream::iter(messages.iter())
            .map(|message| self.deliver_message(message, deadline))
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            fetched: messages.len(),
            ..RunSummary::default()
        };
        let now = Utc::now();

        for report in reports {
            if report.deferred {
                summary.deferred += 1;
                continue;
            }
            summary.classified += 1;
            if report.fallback {
                summary.fallback += 1;
            }
            for (destination, outcome) in &report.deliveries {
                match outcome {
                    DeliveryOutcome::Delivered { .. } => summary.delivered += 1,
                    DeliveryOutcome::Failed { error, .. } => {
                        summary.failed += 1;
                        summary.failures.push(FailedDelivery {
                            message_id: report.id.clone(),
                            subject: report.subject.clone(),
                            destination: destination.to_string(),
                            reason: error.to_string(),
                            attempts: outcome.attempts(),
                        });
                    }
                }
            }
            if report.is_complete() {
                tracker.mark_complete(report.id, now);
                summary.completed += 1;
            } else {
                warn!(id = %report.id, "Message left unprocessed; it will be redelivered next run");
            }
        }

        let cutoff = self
            .settings
            .retention
            .and_then(|r| now.checked_sub_signed(r));
        tracker.flush(cutoff).await?;

        if self.settings.mark_seen && !tracker.completed().is_empty() {
            if let Err(e) = self.mailbox.label_as_read(tracker.completed()).await {
                warn!(error = %e, "Failed to label delivered messages as read");
            }
        }

        info!(
            fetched = summary.fetched,
            classified = summary.classified,
            delivered = summary.delivered,
            failed = summary.failed,
            completed = summary.completed,
            deferred = summary.deferred,
            "Relay run complete"
        );
        Ok(summary)
    }

    /// Classify one message and dispatch every notification it produces.
    async fn deliver_message(
        &self,
        message: &CandidateMessage,
        deadline: Option<Instant>,
    ) -> MessageReport {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(id = %message.id, "Run budget exhausted, deferring message");
            return MessageReport {
                id: message.id.clone(),
                subject: message.subject.clone(),
                fallback: false,
                deliveries: Vec::new(),
                deferred: true,
            };
        }

        let matched = classify(message, &self.rules);
        let notifications = build_all(message, &matched);
        info!(
            id = %message.id,
            subject = %message.subject,
            destinations = notifications.len(),
            fallback = matched.fallback,
            "Dispatching message"
        );

        let outcomes = join_all(notifications.iter().map(|n| self.dispatcher.dispatch(n))).await;
        let deliveries = notifications
            .into_iter()
            .map(|n| n.destination)
            .zip(outcomes)
            .collect();

        MessageReport {
            id: message.id.clone(),
            subject: message.subject.clone(),
            fallback: matched.fallback,
            deliveries,
            deferred: false,
        }
    }
}
