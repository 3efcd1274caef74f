//! Chunked Upload Module
//!
//! Client side of resumable large file uploads:
//! - Deterministic chunking and content hashing for dedup and resume
//! - Bounded-concurrency chunk transfer with per-chunk retry
//! - Cooperative cancellation
//!
//! Protocol Flow:
//! 1. Client hashes the file and sends a check with the file hash
//! 2. Server answers with a stored URL (instant upload) or the chunks it has
//! 3. Client uploads only the missing chunks
//! 4. Client asks the server to merge and receives the file URL

pub mod chunker;
pub mod client;
pub mod hasher;
pub mod orchestrator;
pub mod session;
pub mod source;
pub mod transport;
pub mod types;

pub use client::HttpTransport;
pub use hasher::{compute_hash, hash_source};
pub use orchestrator::{backoff_delay, ChunkUploader, NoopObserver, UploadObserver, UploadOptions};
pub use session::{AbortSignal, InitOutcome, UploadSession, UploadStatus};
pub use source::{ByteSource, FileSource, MemorySource};
pub use transport::UploadTransport;
pub use types::*;
