//! Multi-level limiter
//!
//! Composes named limiters into one admission decision. Layers are evaluated
//! in registration order and evaluation stops at the first denial, so later
//! layers are neither consulted nor charged for a refused request. The order
//! therefore decides both evaluation priority and which layer is reported as
//! the blocker when several would refuse.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use super::{RateLimitDecision, RateLimiter};

/// Attributes of a request used to derive limiter keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Originating network address, if known
    pub origin: Option<String>,

    /// Caller identity, if known
    pub identity: Option<String>,
}

impl RequestContext {
    pub fn new(origin: Option<String>, identity: Option<String>) -> Self {
        Self { origin, identity }
    }
}

/// Derives the limiter key for a request
pub type KeyExtractor = Box<dyn Fn(&RequestContext) -> String + Send + Sync>;

struct Layer {
    name: String,
    limiter: Arc<dyn RateLimiter>,
    key: KeyExtractor,
    cost: u32,
}

/// Decision of one evaluated layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerResult {
    pub name: String,
    pub key: String,
    #[serde(flatten)]
    pub decision: RateLimitDecision,
}

/// Combined decision across all evaluated layers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLevelDecision {
    pub allowed: bool,

    /// Name of the first layer that refused the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,

    pub retry_after_ms: u64,

    /// Results of every layer evaluated, in order
    pub results: Vec<LayerResult>,
}

/// Ordered composition of named limiters
#[derive(Default)]
pub struct MultiLevelLimiter {
    layers: Vec<Layer>,
}

impl MultiLevelLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer evaluated after every previously added one
    pub fn with_layer<F>(
        mut self,
        name: impl Into<String>,
        limiter: Arc<dyn RateLimiter>,
        key: F,
        cost: u32,
    ) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.layers.push(Layer {
            name: name.into(),
            limiter,
            key: Box::new(key),
            cost,
        });
        self
    }

    pub fn check_at(&self, context: &RequestContext, now: Instant) -> MultiLevelDecision {
        let mut results = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            let key = (layer.key)(context);
            let decision = layer.limiter.check_at(&key, layer.cost, now);
            results.push(LayerResult {
                name: layer.name.clone(),
                key,
                decision,
            });

            if !decision.allowed {
                tracing::debug!(
                    layer = %layer.name,
                    retry_after_ms = decision.retry_after_ms,
                    "Request refused by rate limiter"
                );
                return MultiLevelDecision {
                    allowed: false,
                    blocked_by: Some(layer.name.clone()),
                    retry_after_ms: decision.retry_after_ms,
                    results,
                };
            }
        }

        MultiLevelDecision {
            allowed: true,
            blocked_by: None,
            retry_after_ms: 0,
            results,
        }
    }

    pub fn check(&self, context: &RequestContext) -> MultiLevelDecision {
        self.check_at(context, Instant::now())
    }
}
