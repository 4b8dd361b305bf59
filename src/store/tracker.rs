//! Processed-state tracker: load once, mark in memory, flush once.
//!
//! `mark_complete` is only called for a message whose every destination
//! reached `Delivered`. A message with any failed destination stays
//! unmarked and is re-fetched next run, so destinations that did succeed
//! receive a duplicate notification then. That is the accepted
//! at-least-once trade-off.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StateError;
use crate::pipeline::types::MessageId;
use crate::store::traits::{ProcessedSet, ProcessedStore};

/// Owns the processed set for the duration of one run.
pub struct StateTracker {
    store: Arc<dyn ProcessedStore>,
    set: ProcessedSet,
    completed: Vec<MessageId>,
}

impl StateTracker {
    /// Load the persisted set from `store`.
    pub async fn load(store: Arc<dyn ProcessedStore>) -> Result<Self, StateError> {
        let set = store.load().await?;
        debug!(entries = set.len(), "Loaded processed state");
        Ok(Self {
            store,
            set,
            completed: Vec::new(),
        })
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.set
    }

    /// Record a message as fully delivered. Not persisted until `flush`.
    pub fn mark_complete(&mut self, id: MessageId, at: DateTime<Utc>) {
        if self.set.contains(&id) {
            return;
        }
        self.completed.push(id.clone());
        self.set.insert(id, at);
    }

    /// Ids marked during this run, in marking order.
    pub fn completed(&self) -> &[MessageId] {
        &self.completed
    }

    /// Prune entries older than `cutoff` (if given) and persist the set.
    ///
    /// Returns the number of pruned entries.
    pub async fn flush(&mut self, cutoff: Option<DateTime<Utc>>) -> Result<usize, StateError> {
        let pruned = cutoff.map_or(0, |c| self.set.prune_older_than(c));
        self.store.flush(&self.set).await?;
        info!(
            entries = self.set.len(),
            newly_completed = self.completed.len(),
            pruned,
            "Processed state saved"
        );
        Ok(pruned)
    }
}
