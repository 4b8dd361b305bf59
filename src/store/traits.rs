//! `ProcessedStore` trait and the in-memory `ProcessedSet` it persists.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StateError;
use crate::pipeline::types::MessageId;

/// Ids of fully delivered messages, each with its completion time.
///
/// Ordered by id so that persisted output is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    entries: BTreeMap<MessageId, DateTime<Utc>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<MessageId, DateTime<Utc>>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &BTreeMap<MessageId, DateTime<Utc>> {
        &self.entries
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `id` as fully delivered. Re-marking keeps the earlier time.
    pub fn insert(&mut self, id: MessageId, at: DateTime<Utc>) {
        self.entries.entry(id).or_insert(at);
    }

    /// Drop entries completed before `cutoff`. Returns how many were dropped.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, at| *at >= cutoff);
        before - self.entries.len()
    }
}

/// Backend for the processed set. Loaded once and flushed once per run.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Read the current set. A store that has never been written is empty.
    async fn load(&self) -> Result<ProcessedSet, StateError>;

    /// Replace the stored set. Must be all-or-nothing.
    async fn flush(&self, set: &ProcessedSet) -> Result<(), StateError>;
}
