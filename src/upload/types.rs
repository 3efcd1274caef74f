//! Upload types for the chunked upload protocol

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of chunk requests in flight
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default retry budget per chunk
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// First backoff delay after a transient failure
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on backoff delay
pub const BACKOFF_MAX_MS: u64 = 10_000;

/// Header carrying the caller identity used by the per-user limiter
pub const IDENTITY_HEADER: &str = "x-user-id";

/// Error code returned by merge when chunks are missing
pub const INCOMPLETE_CODE: &str = "UPLOAD_INCOMPLETE";

// ============================================================================
// Chunk
// ============================================================================

/// A contiguous byte range `[start, end)` of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// File identity sent with check and merge requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifest {
    /// Content hash of the complete file
    pub file_hash: String,

    /// Original file name
    pub file_name: String,

    /// Number of chunks the file was split into
    pub total_chunks: usize,

    /// Total file size in bytes
    pub file_size: u64,
}

/// Response to a check request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// Whether the complete file is already stored (instant upload)
    pub uploaded: bool,

    /// Location of the stored file when `uploaded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Chunks already received for a partial upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<Vec<usize>>,
}

impl CheckResponse {
    pub fn exists(url: String) -> Self {
        Self {
            uploaded: true,
            url: Some(url),
            uploaded_chunks: None,
        }
    }

    pub fn partial(uploaded_chunks: Vec<usize>) -> Self {
        Self {
            uploaded: false,
            url: None,
            uploaded_chunks: Some(uploaded_chunks),
        }
    }
}

/// Response after a chunk was accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk_index: usize,
}

/// Response after a successful merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub success: bool,
    pub url: String,
}

/// Body of a 429 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub error: String,
    /// Milliseconds to wait before retrying
    pub retry_after: u64,
    /// Limiter layer that refused the request
    pub blocked_by: String,
}

/// Body of any other error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

// ============================================================================
// Client Events
// ============================================================================

/// Upload progress after a chunk completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub percent: u8,
    pub uploaded: usize,
    pub total: usize,
}

impl UploadProgress {
    pub fn new(uploaded: usize, total: usize) -> Self {
        Self {
            percent: percent_of(uploaded, total),
            uploaded,
            total,
        }
    }
}

/// A chunk request refused by the server's rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedEvent {
    pub chunk_index: usize,
    pub retry_after_ms: u64,
    /// Attempt number of the upcoming retry, starting at 1
    pub retry_count: u32,
    pub blocked_by: String,
}

/// Integer percentage, rounded; an empty total counts as complete
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read source: {0}")]
    Read(#[from] std::io::Error),

    #[error("Rate limited by {blocked_by} limiter, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64, blocked_by: String },

    #[error("Transport error{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    #[error("Upload incomplete: {uploaded} of {total} chunks received")]
    Incomplete { uploaded: usize, total: usize },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Chunk {chunk_index} failed after {retries} retries: {source}")]
    RetriesExhausted {
        chunk_index: usize,
        retries: u32,
        source: Box<UploadError>,
    },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Invalid upload state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Whether a chunk request failing with this error may be retried
    ///
    /// Client errors other than 408 are not worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport { status: Some(status), .. } => !(400..500).contains(status) || *status == 408,
            Self::Transport { status: None, .. } => true,
            _ => false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }
}
