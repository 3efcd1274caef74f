//! HTTP transport
//!
//! `UploadTransport` over the upload service's REST API using reqwest.
//! Status codes are folded into the upload error taxonomy:
//! - 429 → `RateLimited`, from the JSON body or the `Retry-After` header
//! - 400 with code `UPLOAD_INCOMPLETE` → `Incomplete`
//! - anything else non-2xx, or a network failure → `Transport`

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::transport::UploadTransport;
use super::types::{
    CheckResponse, ChunkUploadResponse, ErrorBody, FileManifest, MergeResponse, RateLimitedBody,
    UploadError, IDENTITY_HEADER, INCOMPLETE_CODE,
};
use crate::ratelimit::RateLimitStatus;

/// Wait used when a 429 carries neither a body nor a `Retry-After` header
const FALLBACK_RETRY_AFTER_MS: u64 = 1000;

/// Client for the chunked upload API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    identity: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity: None,
        }
    }

    /// Send `X-User-Id` with every request
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/upload/{}", self.base_url, path)
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.identity {
            Some(identity) => request.header(IDENTITY_HEADER, identity),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UploadError> {
        let response = self
            .with_headers(request)
            .send()
            .await
            .map_err(|e| UploadError::transport(e.to_string()))?;
        decode(response).await
    }

    /// Limiter snapshot for this client's origin and identity
    pub async fn rate_limit_status(&self) -> Result<RateLimitStatus, UploadError> {
        self.send(self.client.get(self.endpoint("rate-limit-status")))
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, UploadError> {
    let status = response.status();

    if status.is_success() {
        return response.json::<T>().await.map_err(|e| UploadError::Transport {
            status: Some(status.as_u16()),
            message: format!("Invalid response body: {}", e),
        });
    }

    let retry_after_header = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(match serde_json::from_str::<RateLimitedBody>(&text) {
            Ok(body) => UploadError::RateLimited {
                retry_after_ms: body.retry_after,
                blocked_by: body.blocked_by,
            },
            Err(_) => UploadError::RateLimited {
                retry_after_ms: retry_after_header
                    .map(|secs| secs.saturating_mul(1000))
                    .unwrap_or(FALLBACK_RETRY_AFTER_MS),
                blocked_by: "unknown".to_string(),
            },
        });
    }

    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            code,
            uploaded: Some(uploaded),
            total: Some(total),
            ..
        }) if code == INCOMPLETE_CODE => Err(UploadError::Incomplete { uploaded, total }),
        Ok(body) => Err(UploadError::Transport {
            status: Some(status.as_u16()),
            message: body.error,
        }),
        Err(_) => Err(UploadError::Transport {
            status: Some(status.as_u16()),
            message: if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            },
        }),
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn check(&self, manifest: &FileManifest) -> Result<CheckResponse, UploadError> {
        self.send(self.client.post(self.endpoint("check")).json(manifest))
            .await
    }

    async fn upload_chunk(
        &self,
        manifest: &FileManifest,
        chunk_index: usize,
        bytes: Vec<u8>,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let part = Part::bytes(bytes)
            .file_name(format!("{}.part{}", manifest.file_name, chunk_index))
            .mime_str("application/octet-stream")
            .map_err(|e| UploadError::Internal(e.to_string()))?;

        let form = Form::new()
            .part("chunk", part)
            .text("chunkIndex", chunk_index.to_string())
            .text("totalChunks", manifest.total_chunks.to_string())
            .text("fileHash", manifest.file_hash.clone())
            .text("fileName", manifest.file_name.clone())
            .text("fileSize", manifest.file_size.to_string());

        self.send(self.client.post(self.endpoint("chunk")).multipart(form))
            .await
    }

    async fn merge(&self, manifest: &FileManifest) -> Result<MergeResponse, UploadError> {
        self.send(self.client.post(self.endpoint("merge")).json(manifest))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use super::*;
    use crate::config::{Config, RateLimitConfig};
    use crate::routes::app;
    use crate::state::AppState;
    use crate::storage::MemoryStateStore;
    use crate::upload::{ChunkUploader, InitOutcome, MemorySource, UploadOptions, UploadStatus};

    async fn spawn_server(rate_limit: RateLimitConfig) -> String {
        let mut config = Config::default();
        config.rate_limit = rate_limit;
        let state = AppState::new(config, Arc::new(MemoryStateStore::new()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        format!("http://{}", addr)
    }

    fn manifest(hash: &str, total: usize) -> FileManifest {
        FileManifest {
            file_hash: hash.to_string(),
            file_name: "report.pdf".to_string(),
            total_chunks: total,
            file_size: total as u64 * 8,
        }
    }

    #[tokio::test]
    async fn test_full_upload_against_server() {
        let base = spawn_server(RateLimitConfig::default()).await;
        let transport = Arc::new(HttpTransport::new(&base).with_identity("erin"));

        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
        let options = UploadOptions {
            chunk_size: 8 * 1024,
            ..UploadOptions::default()
        };
        let uploader = ChunkUploader::new(
            Arc::new(MemorySource::new(data.clone())),
            "report.pdf",
            transport.clone(),
            options,
        );

        let outcome = uploader.init().await.unwrap();
        assert_eq!(
            outcome,
            InitOutcome::Ready {
                total_chunks: 7,
                uploaded_chunks: 0
            }
        );

        let url = uploader.upload().await.unwrap();
        assert!(url.ends_with("/report.pdf"));
        assert_eq!(uploader.status(), UploadStatus::Done { url: url.clone() });

        // Same content again is an instant upload
        let again = ChunkUploader::new(
            Arc::new(MemorySource::new(data)),
            "copy.pdf",
            transport.clone(),
            options,
        );
        assert_eq!(again.init().await.unwrap(), InitOutcome::Exists { url });

        let status = transport.rate_limit_status().await.unwrap();
        assert_eq!(status.user.count, 10);
    }

    #[tokio::test]
    async fn test_incomplete_merge_maps_to_error() {
        let base = spawn_server(RateLimitConfig::default()).await;
        let transport = HttpTransport::new(base);
        let manifest = manifest("abc", 2);

        transport.upload_chunk(&manifest, 0, vec![1; 8]).await.unwrap();
        let err = transport.merge(&manifest).await.unwrap_err();

        assert!(matches!(err, UploadError::Incomplete { uploaded: 1, total: 2 }));
    }

    #[tokio::test]
    async fn test_rate_limited_maps_to_error() {
        let base = spawn_server(RateLimitConfig {
            user_max_requests: 1,
            ..RateLimitConfig::default()
        })
        .await;
        let transport = HttpTransport::new(base).with_identity("frank");
        let manifest = manifest("def", 1);

        transport.check(&manifest).await.unwrap();
        let err = transport.check(&manifest).await.unwrap_err();

        match err {
            UploadError::RateLimited {
                retry_after_ms,
                blocked_by,
            } => {
                assert_eq!(blocked_by, "user");
                assert!(retry_after_ms > 59_000 && retry_after_ms <= 60_000);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_request_is_not_transient() {
        let base = spawn_server(RateLimitConfig::default()).await;
        let transport = HttpTransport::new(base);

        let err = transport.upload_chunk(&manifest("ghi", 2), 5, vec![0; 8]).await.unwrap_err();

        assert!(matches!(err, UploadError::Transport { status: Some(400), .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(format!("http://{}", addr));
        let err = transport.check(&manifest("x", 1)).await.unwrap_err();

        assert!(matches!(err, UploadError::Transport { status: None, .. }));
        assert!(err.is_transient());
    }
}
