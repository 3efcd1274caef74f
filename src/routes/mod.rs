//! Route modules for the Chunkwise upload service

pub mod upload;

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ratelimit::RequestContext;
use crate::state::AppState;
use crate::upload::IDENTITY_HEADER;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api/upload", upload::router(state.config().server.max_chunk_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Request Context
// ============================================================================

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Origin address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
fn origin_of(parts: &Parts) -> Option<String> {
    header_value(&parts.headers, "x-forwarded-for")
        .and_then(|list| {
            list.split(',')
                .map(str::trim)
                .find(|hop| !hop.is_empty())
                .map(str::to_string)
        })
        .or_else(|| header_value(&parts.headers, "x-real-ip"))
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestContext::new(
            origin_of(parts),
            header_value(&parts.headers, IDENTITY_HEADER),
        ))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)], peer: Option<SocketAddr>) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(addr) = peer {
            parts.extensions.insert(ConnectInfo(addr));
        }
        parts
    }

    #[tokio::test]
    async fn test_origin_precedence() {
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();

        let mut p = parts(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1"), ("x-real-ip", "198.51.100.2")], Some(peer));
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.origin.as_deref(), Some("203.0.113.5"));

        let mut p = parts(&[("x-real-ip", "198.51.100.2")], Some(peer));
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.origin.as_deref(), Some("198.51.100.2"));

        let mut p = parts(&[], Some(peer));
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.origin.as_deref(), Some("192.168.1.9"));

        let mut p = parts(&[], None);
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.origin, None);
    }

    #[tokio::test]
    async fn test_identity_header() {
        let mut p = parts(&[("X-User-Id", "alice")], None);
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.identity.as_deref(), Some("alice"));

        let mut p = parts(&[("X-User-Id", "   ")], None);
        let ctx = RequestContext::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ctx.identity, None);
    }
}
