//! Processed-state persistence: which message ids were fully delivered.

pub mod file;
pub mod memory;
pub mod tracker;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use tracker::StateTracker;
pub use traits::{ProcessedSet, ProcessedStore};
