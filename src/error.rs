//! HTTP error responses for the upload API

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::storage::StoreError;
use crate::upload::{ErrorBody, RateLimitedBody, INCOMPLETE_CODE};

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Too many requests")]
    RateLimited { retry_after_ms: u64, blocked_by: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("Upload incomplete: {uploaded} of {total} chunks received")]
    Incomplete { uploaded: usize, total: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Incomplete { .. } => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Incomplete { .. } => INCOMPLETE_CODE,
            ApiError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Whole seconds for the `Retry-After` header, rounded up
fn retry_after_secs(retry_after_ms: u64) -> u64 {
    retry_after_ms.div_ceil(1000)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::Storage(e) = &self {
            tracing::error!(error = %e, "Upload state storage failed");
        }

        match self {
            ApiError::RateLimited {
                retry_after_ms,
                blocked_by,
            } => {
                let body = Json(RateLimitedBody {
                    error: "Too many requests".to_string(),
                    retry_after: retry_after_ms,
                    blocked_by,
                });
                let mut response = (status, body).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(retry_after_ms)),
                );
                response
            }
            other => {
                let (uploaded, total) = match &other {
                    ApiError::Incomplete { uploaded, total } => (Some(*uploaded), Some(*total)),
                    _ => (None, None),
                };
                let body = Json(ErrorBody {
                    error: other.to_string(),
                    code: other.code().to_string(),
                    uploaded,
                    total,
                });
                (status, body).into_response()
            }
        }
    }
}
