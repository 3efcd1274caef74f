//! Chunk upload orchestrator
//!
//! Drives one file through the upload lifecycle:
//! 1. `init`: chunk and hash the source, then ask the server what it has
//! 2. `upload`: send the missing chunks with bounded concurrency, retrying
//!    rate-limited and transient failures per chunk
//! 3. Merge once every chunk has been acknowledged
//!
//! `abort` may be called from any task at any time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::chunker;
use super::hasher;
use super::session::{AbortSignal, InitOutcome, UploadSession, UploadStatus};
use super::source::ByteSource;
use super::transport::UploadTransport;
use super::types::{
    Chunk, FileManifest, MergeResponse, RateLimitedEvent, UploadError, UploadProgress,
    BACKOFF_BASE_MS, BACKOFF_MAX_MS, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
};

// ============================================================================
// Options and Callbacks
// ============================================================================

/// Tuning for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_size: u64,
    /// Maximum chunk requests in flight
    pub concurrency: usize,
    /// Retry budget per chunk
    pub max_retries: u32,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Receives upload events; every method defaults to doing nothing
///
/// Callbacks run on the uploader's tasks and must not block.
pub trait UploadObserver: Send + Sync {
    fn on_hash_progress(&self, _percent: u8) {}

    /// Called once per acknowledged chunk with a non-decreasing `uploaded`
    fn on_progress(&self, _progress: UploadProgress) {}

    /// Called before waiting out a 429
    fn on_rate_limited(&self, _event: &RateLimitedEvent) {}
}

pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

/// Backoff before retry number `retry_count + 1` of a transient failure
pub fn backoff_delay(retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_MAX_MS))
}

// ============================================================================
// Uploader
// ============================================================================

/// Client-side orchestrator for one file
pub struct ChunkUploader {
    source: Arc<dyn ByteSource>,
    file_name: String,
    transport: Arc<dyn UploadTransport>,
    options: UploadOptions,
    observer: Arc<dyn UploadObserver>,
    state: Mutex<UploaderState>,
}

struct UploaderState {
    status: UploadStatus,
    session: Option<UploadSession>,
    signal: AbortSignal,
}

impl ChunkUploader {
    pub fn new(
        source: Arc<dyn ByteSource>,
        file_name: impl Into<String>,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
    ) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            transport,
            options: UploadOptions {
                concurrency: options.concurrency.max(1),
                ..options
            },
            observer: Arc::new(NoopObserver),
            state: Mutex::new(UploaderState {
                status: UploadStatus::Idle,
                session: None,
                signal: AbortSignal::new(),
            }),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn status(&self) -> UploadStatus {
        self.state.lock().status.clone()
    }

    /// Chunk progress of the current session, if one has been initialized
    pub fn progress(&self) -> Option<UploadProgress> {
        let state = self.state.lock();
        state.session.as_ref().map(UploadSession::progress)
    }

    pub fn file_hash(&self) -> Option<String> {
        self.state.lock().session.as_ref().map(|s| s.file_hash.clone())
    }

    /// Cancel the running operation
    ///
    /// Requests already on the wire finish but are not retried, and no
    /// merge is sent. A fresh `init` is needed afterwards.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.signal.abort();
        if !state.status.is_terminal() {
            state.status = UploadStatus::Aborted;
            tracing::info!(file_name = %self.file_name, "Upload aborted");
        }
    }

    /// Set status unless `signal` fired in the meantime
    fn transition(&self, signal: &AbortSignal, status: UploadStatus) -> Result<(), UploadError> {
        let mut state = self.state.lock();
        signal.check()?;
        state.status = status;
        Ok(())
    }

    fn fail(&self, signal: &AbortSignal, error: UploadError) -> UploadError {
        let mut state = self.state.lock();
        if !signal.is_aborted() && !matches!(error, UploadError::Cancelled) {
            tracing::error!(file_name = %self.file_name, error = %error, "Upload failed");
            state.status = UploadStatus::Error {
                message: error.to_string(),
            };
        }
        error
    }

    // ========================================================================
    // Init
    // ========================================================================

    /// Chunk and hash the source, then query the server for existing state
    ///
    /// Always starts a fresh session.
    pub async fn init(&self) -> Result<InitOutcome, UploadError> {
        let signal = {
            let mut state = self.state.lock();
            if state.status.is_busy() {
                return Err(UploadError::InvalidState(
                    "an upload is already running".to_string(),
                ));
            }
            state.signal = AbortSignal::new();
            state.session = None;
            state.status = UploadStatus::Hashing;
            state.signal.clone()
        };

        match self.prepare(&signal).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(&signal, e)),
        }
    }

    async fn prepare(&self, signal: &AbortSignal) -> Result<InitOutcome, UploadError> {
        let chunks = chunker::split(self.source.len(), self.options.chunk_size)?;

        let observer = self.observer.clone();
        let file_hash = hasher::hash_source(self.source.as_ref(), self.options.chunk_size, signal, |p| {
            observer.on_hash_progress(p)
        })
        .await?;
        signal.check()?;

        let mut session = UploadSession::new(
            self.file_name.clone(),
            self.source.len(),
            file_hash,
            chunks,
        );
        let manifest = session.manifest();

        tracing::debug!(
            file_hash = %manifest.file_hash,
            total_chunks = manifest.total_chunks,
            "Checking server for existing upload"
        );

        match self.transport.check(&manifest).await {
            Ok(response) if response.uploaded => {
                let url = response.url.unwrap_or_default();
                tracing::info!(file_hash = %manifest.file_hash, url = %url, "File already on server");

                let mut state = self.state.lock();
                signal.check()?;
                state.status = UploadStatus::Exists { url: url.clone() };
                state.session = Some(session);
                return Ok(InitOutcome::Exists { url });
            }
            Ok(response) => {
                for index in response.uploaded_chunks.unwrap_or_default() {
                    session.mark_uploaded(index);
                }
            }
            Err(e) => {
                tracing::warn!(
                    file_hash = %manifest.file_hash,
                    error = %e,
                    "Resume check failed, uploading all chunks"
                );
            }
        }

        let outcome = InitOutcome::Ready {
            total_chunks: session.total_chunks(),
            uploaded_chunks: session.uploaded_count(),
        };

        let mut state = self.state.lock();
        signal.check()?;
        state.status = UploadStatus::Ready;
        state.session = Some(session);
        Ok(outcome)
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Transfer missing chunks and merge; returns the stored file's URL
    pub async fn upload(&self) -> Result<String, UploadError> {
        let (session, signal) = {
            let mut state = self.state.lock();
            match &state.status {
                UploadStatus::Ready => {}
                UploadStatus::Exists { url } | UploadStatus::Done { url } => return Ok(url.clone()),
                UploadStatus::Aborted => return Err(UploadError::Cancelled),
                UploadStatus::Uploading => {
                    return Err(UploadError::InvalidState(
                        "an upload is already running".to_string(),
                    ))
                }
                other => {
                    return Err(UploadError::InvalidState(format!(
                        "cannot upload from {:?}, call init() first",
                        other
                    )))
                }
            }
            let session = match state.session.clone() {
                Some(session) => session,
                None => return Err(UploadError::InvalidState("no session".to_string())),
            };
            state.status = UploadStatus::Uploading;
            (session, state.signal.clone())
        };

        match self.run(session, &signal).await {
            Ok(url) => Ok(url),
            Err(e) => Err(self.fail(&signal, e)),
        }
    }

    async fn run(&self, mut session: UploadSession, signal: &AbortSignal) -> Result<String, UploadError> {
        let manifest = Arc::new(session.manifest());
        tracing::info!(
            file_hash = %manifest.file_hash,
            total_chunks = manifest.total_chunks,
            already_uploaded = session.uploaded_count(),
            "Starting chunk transfer"
        );

        let transferred = self.transfer(&session, manifest.clone(), signal).await;

        for index in &transferred.uploaded {
            session.mark_uploaded(*index);
        }
        // Keep acknowledged chunks visible even when the transfer failed
        {
            let mut state = self.state.lock();
            if let Some(current) = state.session.as_mut() {
                for index in session.uploaded() {
                    current.mark_uploaded(*index);
                }
            }
        }

        signal.check()?;
        if let Some(error) = transferred.failure {
            return Err(error);
        }

        if !session.is_complete() {
            return Err(UploadError::Incomplete {
                uploaded: session.uploaded_count(),
                total: session.total_chunks(),
            });
        }

        let response = self.merge(&manifest, signal).await?;
        self.transition(signal, UploadStatus::Done {
            url: response.url.clone(),
        })?;

        tracing::info!(file_hash = %manifest.file_hash, url = %response.url, "Upload complete");
        Ok(response.url)
    }

    /// Dispatch pending chunks in index order with at most `concurrency`
    /// in flight, then wait for every dispatched chunk to settle
    async fn transfer(
        &self,
        session: &UploadSession,
        manifest: Arc<FileManifest>,
        signal: &AbortSignal,
    ) -> TransferOutcome {
        let context = Arc::new(TransferContext {
            uploaded: Mutex::new(session.uploaded().clone()),
            failure: Mutex::new(None),
            total: session.total_chunks(),
        });
        let worker = ChunkWorker {
            source: self.source.clone(),
            transport: self.transport.clone(),
            observer: self.observer.clone(),
            manifest,
            signal: signal.clone(),
            max_retries: self.options.max_retries,
            context: context.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();

        for chunk in session.pending_chunks() {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = signal.aborted() => break,
            };
            if signal.is_aborted() || context.has_failed() {
                break;
            }

            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.run(chunk).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                context.record_failure(UploadError::Internal(format!("chunk task failed: {}", e)));
            }
        }

        let uploaded = context.uploaded.lock().clone();
        let failure = context.failure.lock().take();
        TransferOutcome { uploaded, failure }
    }

    /// Merge, waiting out rate limits within the retry budget
    async fn merge(
        &self,
        manifest: &FileManifest,
        signal: &AbortSignal,
    ) -> Result<MergeResponse, UploadError> {
        let mut retry_count = 0u32;
        loop {
            signal.check()?;
            match self.transport.merge(manifest).await {
                Err(UploadError::RateLimited {
                    retry_after_ms,
                    blocked_by,
                }) if retry_count < self.options.max_retries => {
                    retry_count += 1;
                    tracing::warn!(
                        file_hash = %manifest.file_hash,
                        blocked_by = %blocked_by,
                        retry_after_ms = retry_after_ms,
                        retry_count = retry_count,
                        "Merge rate limited"
                    );
                    signal.sleep(Duration::from_millis(retry_after_ms)).await?;
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// Chunk Worker
// ============================================================================

struct TransferOutcome {
    uploaded: BTreeSet<usize>,
    failure: Option<UploadError>,
}

/// Shared between the dispatcher and every chunk task of one transfer
struct TransferContext {
    uploaded: Mutex<BTreeSet<usize>>,
    /// First fatal error; stops further dispatch
    failure: Mutex<Option<UploadError>>,
    total: usize,
}

impl TransferContext {
    fn record_success(&self, index: usize, observer: &dyn UploadObserver) {
        let mut uploaded = self.uploaded.lock();
        if uploaded.insert(index) {
            // Reported under the lock so `uploaded` never goes backwards
            observer.on_progress(UploadProgress::new(uploaded.len(), self.total));
        }
    }

    fn record_failure(&self, error: UploadError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    fn has_failed(&self) -> bool {
        self.failure.lock().is_some()
    }
}

#[derive(Clone)]
struct ChunkWorker {
    source: Arc<dyn ByteSource>,
    transport: Arc<dyn UploadTransport>,
    observer: Arc<dyn UploadObserver>,
    manifest: Arc<FileManifest>,
    signal: AbortSignal,
    max_retries: u32,
    context: Arc<TransferContext>,
}

impl ChunkWorker {
    async fn run(&self, chunk: Chunk) {
        match self.send(chunk).await {
            Ok(()) => self.context.record_success(chunk.index, self.observer.as_ref()),
            Err(UploadError::Cancelled) => {
                tracing::debug!(chunk_index = chunk.index, "Chunk cancelled");
            }
            Err(e) if self.signal.is_aborted() => {
                tracing::debug!(chunk_index = chunk.index, error = %e, "Chunk failed after abort");
            }
            Err(e) => self.context.record_failure(e),
        }
    }

    /// Send one chunk, retrying transient failures until the budget runs out
    async fn send(&self, chunk: Chunk) -> Result<(), UploadError> {
        let mut retry_count = 0u32;

        loop {
            self.signal.check()?;
            let bytes = self.source.read_range(chunk.start, chunk.end).await?;

            let error = match self.transport.upload_chunk(&self.manifest, chunk.index, bytes).await {
                Ok(_) => {
                    tracing::debug!(chunk_index = chunk.index, retries = retry_count, "Chunk uploaded");
                    return Ok(());
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if retry_count >= self.max_retries {
                return Err(UploadError::RetriesExhausted {
                    chunk_index: chunk.index,
                    retries: retry_count,
                    source: Box::new(error),
                });
            }

            let delay = match &error {
                UploadError::RateLimited {
                    retry_after_ms,
                    blocked_by,
                } => {
                    retry_count += 1;
                    self.observer.on_rate_limited(&RateLimitedEvent {
                        chunk_index: chunk.index,
                        retry_after_ms: *retry_after_ms,
                        retry_count,
                        blocked_by: blocked_by.clone(),
                    });
                    Duration::from_millis(*retry_after_ms)
                }
                _ => {
                    let delay = backoff_delay(retry_count);
                    retry_count += 1;
                    delay
                }
            };

            tracing::warn!(
                chunk_index = chunk.index,
                retry_count = retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying chunk"
            );
            self.signal.sleep(delay).await?;
        }
    }
}
