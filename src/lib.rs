//! Chunkwise
//!
//! Resumable chunked uploads with server-side rate limiting.
//!
//! # Modules
//!
//! - `upload`: Client-side chunking, hashing and upload orchestration
//! - `ratelimit`: Token bucket, leaky bucket, sliding window and layered limiters
//! - `routes`: The upload service's HTTP API
//! - `storage`: Persisted upload state for the service

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
