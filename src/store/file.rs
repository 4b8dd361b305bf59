//! JSON file store with atomic replace.
//!
//! Format: `{"version": 1, "processed": {"<id>": "<rfc3339>", ...}}`.
//! Writes go to a sibling `.tmp` file which is then renamed over the
//! target, so a crash mid-flush leaves either the old or the new set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::StateError;
use crate::pipeline::types::MessageId;
use crate::store::traits::{ProcessedSet, ProcessedStore};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    processed: BTreeMap<MessageId, DateTime<Utc>>,
}

/// File-backed processed set.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "processed.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> StateError {
        StateError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ProcessedStore for FileStore {
    async fn load(&self) -> Result<ProcessedSet, StateError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet, starting empty");
                return Ok(ProcessedSet::new());
            }
            Err(e) => return Err(self.io_error(&self.path, e)),
        };

        let file: StateFile = serde_json::from_str(&json)?;
        if file.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: file.version,
                expected: STATE_VERSION,
            });
        }
        Ok(ProcessedSet::from_entries(file.processed))
    }

    async fn flush(&self, set: &ProcessedSet) -> Result<(), StateError> {
        let file = StateFile {
            version: STATE_VERSION,
            processed: set.entries().clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(parent, e))?;
        }

        let temp = self.temp_path();
        let mut out = fs::File::create(&temp)
            .await
            .map_err(|e| self.io_error(&temp, e))?;
        out.write_all(&json)
            .await
            .map_err(|e| self.io_error(&temp, e))?;
        out.sync_all().await.map_err(|e| self.io_error(&temp, e))?;
        drop(out);

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(&self.path, e))?;

        debug!(path = %self.path.display(), entries = set.len(), "State flushed");
        Ok(())
    }
}
