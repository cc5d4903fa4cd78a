//! Upstream client decorator recording per-attempt metrics.

use async_trait::async_trait;
use blox_core::{RequestDescriptor, UpstreamClient, UpstreamResult};
use blox_telemetry::Metrics;
use std::sync::Arc;
use tokio::time::Instant;

/// Wraps an [`UpstreamClient`] and records every attempt it makes
pub struct InstrumentedClient {
    inner: Arc<dyn UpstreamClient>,
    metrics: Arc<Metrics>,
}

impl InstrumentedClient {
    /// Wrap a client
    #[must_use]
    pub fn new(inner: Arc<dyn UpstreamClient>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    /// The wrapped client
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn UpstreamClient> {
        &self.inner
    }
}

#[async_trait]
impl UpstreamClient for InstrumentedClient {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn call(&self, descriptor: &RequestDescriptor) -> UpstreamResult {
        let start = Instant::now();
        let result = self.inner.call(descriptor).await;
        self.metrics.record_upstream(
            descriptor.category().as_str(),
            result.kind(),
            start.elapsed(),
        );
        result
    }
}

impl std::fmt::Debug for InstrumentedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedClient")
            .field("upstream", &self.inner.id())
            .finish_non_exhaustive()
    }
}
