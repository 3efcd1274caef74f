//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/upload/check - Report a stored file or the chunks already received
//! - POST /api/upload/chunk - Receive one chunk (multipart)
//! - POST /api/upload/merge - Assemble the file once every chunk is present
//! - GET /api/upload/rate-limit-status - Limiter snapshot for the caller
//!
//! Check, chunk and merge each pass through the upload rate limiter first.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::error::ApiError;
use crate::ratelimit::{RateLimitStatus, RequestContext};
use crate::state::AppState;
use crate::storage::CompletedFile;
use crate::upload::{CheckResponse, ChunkUploadResponse, FileManifest, MergeResponse};

/// Room for multipart boundaries and the text fields next to the chunk bytes
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/check", post(check))
        .route(
            "/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/merge", post(merge))
        .route("/rate-limit-status", get(rate_limit_status))
}

// ============================================================================
// Helpers
// ============================================================================

/// Run the limiter chain for this request
fn admit(state: &AppState, context: &RequestContext) -> Result<(), ApiError> {
    let decision = state.limiter().check(context);
    if decision.allowed {
        return Ok(());
    }

    let blocked_by = decision.blocked_by.unwrap_or_default();
    tracing::warn!(
        origin = ?context.origin,
        identity = ?context.identity,
        blocked_by = %blocked_by,
        retry_after_ms = decision.retry_after_ms,
        "Upload request rate limited"
    );

    Err(ApiError::RateLimited {
        retry_after_ms: decision.retry_after_ms,
        blocked_by,
    })
}

fn validate_manifest(manifest: &FileManifest) -> Result<(), ApiError> {
    if manifest.file_hash.trim().is_empty() {
        return Err(ApiError::BadRequest("fileHash must not be empty".to_string()));
    }
    Ok(())
}

/// Fields of a chunk upload form
#[derive(Debug)]
struct ChunkForm {
    chunk: Vec<u8>,
    manifest: FileManifest,
    chunk_index: usize,
}

impl ChunkForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut chunk = None;
        let mut chunk_index = None;
        let mut total_chunks = None;
        let mut file_hash = None;
        let mut file_name = None;
        let mut file_size = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "chunk" => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Failed to read chunk: {}", e)))?;
                    chunk = Some(bytes.to_vec());
                }
                "chunkIndex" => chunk_index = Some(parse_field(&name, field.text().await)?),
                "totalChunks" => total_chunks = Some(parse_field(&name, field.text().await)?),
                "fileSize" => file_size = Some(parse_field(&name, field.text().await)?),
                "fileHash" => file_hash = Some(text_field(&name, field.text().await)?),
                "fileName" => file_name = Some(text_field(&name, field.text().await)?),
                other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
            }
        }

        let form = Self {
            chunk: chunk.ok_or_else(|| missing("chunk"))?,
            chunk_index: chunk_index.ok_or_else(|| missing("chunkIndex"))?,
            manifest: FileManifest {
                file_hash: file_hash.ok_or_else(|| missing("fileHash"))?,
                file_name: file_name.ok_or_else(|| missing("fileName"))?,
                total_chunks: total_chunks.ok_or_else(|| missing("totalChunks"))?,
                file_size: file_size.ok_or_else(|| missing("fileSize"))?,
            },
        };

        validate_manifest(&form.manifest)?;
        if form.chunk_index >= form.manifest.total_chunks {
            return Err(ApiError::BadRequest(format!(
                "chunkIndex {} out of range for {} chunks",
                form.chunk_index, form.manifest.total_chunks
            )));
        }

        Ok(form)
    }
}

fn missing(name: &str) -> ApiError {
    ApiError::BadRequest(format!("Missing field {}", name))
}

fn text_field(
    name: &str,
    text: Result<String, axum::extract::multipart::MultipartError>,
) -> Result<String, ApiError> {
    text.map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))
}

fn parse_field<T: std::str::FromStr>(
    name: &str,
    text: Result<String, axum::extract::multipart::MultipartError>,
) -> Result<T, ApiError> {
    let text = text_field(name, text)?;
    text.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {}: {:?}", name, text)))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/upload/check
async fn check(
    State(state): State<AppState>,
    context: RequestContext,
    Json(manifest): Json<FileManifest>,
) -> Result<Json<CheckResponse>, ApiError> {
    admit(&state, &context)?;
    validate_manifest(&manifest)?;

    if let Some(file) = state.store().completed_file(&manifest.file_hash).await? {
        tracing::info!(file_hash = %manifest.file_hash, "File already stored, instant upload");
        return Ok(Json(CheckResponse::exists(file.url)));
    }

    let uploaded = state.store().uploaded_chunks(&manifest.file_hash).await?;
    tracing::debug!(
        file_hash = %manifest.file_hash,
        uploaded = uploaded.len(),
        total = manifest.total_chunks,
        "Upload check"
    );

    Ok(Json(CheckResponse::partial(uploaded.into_iter().collect())))
}

/// POST /api/upload/chunk
async fn upload_chunk(
    State(state): State<AppState>,
    context: RequestContext,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, ApiError> {
    admit(&state, &context)?;
    let form = ChunkForm::read(&mut multipart).await?;

    let received = state
        .store()
        .record_chunk(&form.manifest.file_hash, form.chunk_index)
        .await?;

    tracing::debug!(
        file_hash = %form.manifest.file_hash,
        chunk_index = form.chunk_index,
        chunk_bytes = form.chunk.len(),
        received = received,
        total = form.manifest.total_chunks,
        "Chunk received"
    );

    Ok(Json(ChunkUploadResponse {
        success: true,
        chunk_index: form.chunk_index,
    }))
}

/// POST /api/upload/merge
async fn merge(
    State(state): State<AppState>,
    context: RequestContext,
    Json(manifest): Json<FileManifest>,
) -> Result<Json<MergeResponse>, ApiError> {
    admit(&state, &context)?;
    validate_manifest(&manifest)?;

    if let Some(file) = state.store().completed_file(&manifest.file_hash).await? {
        return Ok(Json(MergeResponse {
            success: true,
            url: file.url,
        }));
    }

    let received = state.store().uploaded_chunks(&manifest.file_hash).await?;
    let present = (0..manifest.total_chunks)
        .filter(|index| received.contains(index))
        .count();

    if present < manifest.total_chunks {
        return Err(ApiError::Incomplete {
            uploaded: present,
            total: manifest.total_chunks,
        });
    }

    let url = state.file_url(&manifest.file_hash, &manifest.file_name);
    state
        .store()
        .complete_file(
            &manifest.file_hash,
            CompletedFile {
                file_name: manifest.file_name.clone(),
                url: url.clone(),
                uploaded_at: Utc::now(),
            },
        )
        .await?;

    tracing::info!(
        file_hash = %manifest.file_hash,
        file_name = %manifest.file_name,
        file_size = manifest.file_size,
        total_chunks = manifest.total_chunks,
        "Upload merged"
    );

    Ok(Json(MergeResponse { success: true, url }))
}

/// GET /api/upload/rate-limit-status
///
/// Read-only; does not consume from any limiter.
async fn rate_limit_status(
    State(state): State<AppState>,
    context: RequestContext,
) -> Json<RateLimitStatus> {
    Json(state.limiter().status(&context))
}
