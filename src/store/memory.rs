//! In-memory store for tests and dry runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::StateError;
use crate::store::traits::{ProcessedSet, ProcessedStore};

/// Processed set held in memory; counts flushes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    set: Mutex<ProcessedSet>,
    flushes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(set: ProcessedSet) -> Self {
        Self {
            set: Mutex::new(set),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Current persisted contents.
    pub fn snapshot(&self) -> ProcessedSet {
        self.set
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessedStore for MemoryStore {
    async fn load(&self) -> Result<ProcessedSet, StateError> {
        Ok(self.snapshot())
    }

    async fn flush(&self, set: &ProcessedSet) -> Result<(), StateError> {
        if let Ok(mut guard) = self.set.lock() {
            *guard = set.clone();
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
