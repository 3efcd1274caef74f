//! Upload session state
//!
//! Holds the client-side state of one file upload:
//! - Lifecycle status visible to callers
//! - Chunk plan and the set of chunks the server has acknowledged
//! - Cancellation signal shared by every in-flight chunk task

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use super::types::{Chunk, FileManifest, UploadError, UploadProgress};

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UploadStatus {
    /// Nothing started yet
    Idle,
    /// Computing the content hash
    Hashing,
    /// Hash known and server consulted; chunks may be sent
    Ready,
    /// Chunk transfer in progress
    Uploading,
    /// File assembled by the server
    Done { url: String },
    /// Server already had the complete file
    Exists { url: String },
    /// Upload failed
    Error { message: String },
    /// Cancelled by the caller
    Aborted,
}

impl UploadStatus {
    /// No further transitions happen without a new upload
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Exists { .. } | Self::Error { .. } | Self::Aborted
        )
    }

    /// Work is running
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Hashing | Self::Uploading)
    }
}

/// Result of initializing an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Server already stores this content
    Exists { url: String },
    /// Ready to transfer the remaining chunks
    Ready {
        total_chunks: usize,
        uploaded_chunks: usize,
    },
}

// ============================================================================
// Session
// ============================================================================

/// Chunk plan and acknowledgement set for one file
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub chunks: Vec<Chunk>,

    /// Indices acknowledged by the server, never cleared during an upload
    uploaded: BTreeSet<usize>,
}

impl UploadSession {
    pub fn new(file_name: String, file_size: u64, file_hash: String, chunks: Vec<Chunk>) -> Self {
        Self {
            file_name,
            file_size,
            file_hash,
            chunks,
            uploaded: BTreeSet::new(),
        }
    }

    pub fn manifest(&self) -> FileManifest {
        FileManifest {
            file_hash: self.file_hash.clone(),
            file_name: self.file_name.clone(),
            total_chunks: self.total_chunks(),
            file_size: self.file_size,
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn uploaded(&self) -> &BTreeSet<usize> {
        &self.uploaded
    }

    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    /// Chunks not yet acknowledged, in index order
    pub fn pending_chunks(&self) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|c| !self.uploaded.contains(&c.index))
            .copied()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded.len() == self.chunks.len()
    }

    pub fn progress(&self) -> UploadProgress {
        UploadProgress::new(self.uploaded.len(), self.chunks.len())
    }

    /// Record an acknowledged chunk; out-of-range indices are ignored
    ///
    /// Returns true when the index was new.
    pub fn mark_uploaded(&mut self, index: usize) -> bool {
        index < self.chunks.len() && self.uploaded.insert(index)
    }
}

// ============================================================================
// Abort Signal
// ============================================================================

/// One-way cancellation flag observed by every chunk task
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `abort` has been called
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot fail while we borrow it
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    /// Sleep for `duration`, returning early with `Cancelled` on abort
    pub async fn sleep(&self, duration: Duration) -> Result<(), UploadError> {
        if self.is_aborted() {
            return Err(UploadError::Cancelled);
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.aborted() => Err(UploadError::Cancelled),
        }
    }

    /// Fail with `Cancelled` if the signal has fired
    pub fn check(&self) -> Result<(), UploadError> {
        if self.is_aborted() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
