//! Upload transport abstraction
//!
//! The orchestrator talks to the server only through this trait, so the
//! HTTP client and the in-process test doubles are interchangeable.

use async_trait::async_trait;

use super::types::{CheckResponse, ChunkUploadResponse, FileManifest, MergeResponse, UploadError};

/// The three server calls of the chunked upload protocol
///
/// Implementations map a 429 to `UploadError::RateLimited` and other
/// failures to `UploadError::Transport` so the orchestrator can decide
/// what to retry.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Ask whether the file, or some of its chunks, is already stored
    async fn check(&self, manifest: &FileManifest) -> Result<CheckResponse, UploadError>;

    /// Send one chunk's bytes
    async fn upload_chunk(
        &self,
        manifest: &FileManifest,
        chunk_index: usize,
        bytes: Vec<u8>,
    ) -> Result<ChunkUploadResponse, UploadError>;

    /// Ask the server to assemble the file from its chunks
    async fn merge(&self, manifest: &FileManifest) -> Result<MergeResponse, UploadError>;
}
