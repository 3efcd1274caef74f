//! Upload state storage
//!
//! Tracks which files are complete and which chunks of in-progress files
//! the server has received. Backends:
//! - `MemoryStateStore`: process-local, lost on restart
//! - `FileStateStore`: JSON snapshot on disk, survives restarts

mod file;
mod memory;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A file the server has assembled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedFile {
    pub file_name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Persisted upload state, keyed by file hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub completed: HashMap<String, CompletedFile>,

    /// Chunk ordinals received for files not yet merged
    #[serde(default)]
    pub in_progress: HashMap<String, BTreeSet<usize>>,
}

impl StoreSnapshot {
    /// Returns the number of distinct chunks now recorded for the file
    fn record_chunk(&mut self, file_hash: &str, chunk_index: usize) -> usize {
        let chunks = self.in_progress.entry(file_hash.to_string()).or_default();
        chunks.insert(chunk_index);
        chunks.len()
    }

    fn complete(&mut self, file_hash: &str, file: CompletedFile) {
        self.in_progress.remove(file_hash);
        self.completed.insert(file_hash.to_string(), file);
    }

    fn uploaded_chunks(&self, file_hash: &str) -> BTreeSet<usize> {
        self.in_progress.get(file_hash).cloned().unwrap_or_default()
    }
}

/// Backend for upload state
#[async_trait]
pub trait UploadStateStore: Send + Sync {
    async fn completed_file(&self, file_hash: &str) -> Result<Option<CompletedFile>, StoreError>;

    async fn uploaded_chunks(&self, file_hash: &str) -> Result<BTreeSet<usize>, StoreError>;

    /// Record a received chunk; re-recording the same ordinal is a no-op
    ///
    /// Returns the number of distinct chunks received for the file.
    async fn record_chunk(&self, file_hash: &str, chunk_index: usize) -> Result<usize, StoreError>;

    /// Mark the file complete and drop its in-progress chunk record
    async fn complete_file(&self, file_hash: &str, file: CompletedFile) -> Result<(), StoreError>;
}
