//! The gateway facade.

use crate::instrumented::InstrumentedClient;
use blox_core::{GatewayError, GatewayResponse, RequestDescriptor, UpstreamClient};
use blox_resilience::{RateLimiter, ResponseCache, RetryController};
use blox_telemetry::Metrics;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Entry point for every upstream fetch
///
/// Cheap to clone; all components are shared.
#[derive(Clone)]
pub struct Gateway {
    client: Arc<dyn UpstreamClient>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    retry: RetryController,
    metrics: Option<Arc<Metrics>>,
}

impl Gateway {
    /// Create a builder around the upstream client
    #[must_use]
    pub fn builder(client: Arc<dyn UpstreamClient>) -> GatewayBuilder {
        GatewayBuilder::new(client)
    }

    /// The upstream client (instrumented when metrics are attached)
    #[must_use]
    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    /// The shared rate limiter
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// The shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// The retry controller
    #[must_use]
    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    /// Metrics, if attached
    #[must_use]
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Fetch without a caller deadline
    pub async fn fetch(&self, descriptor: &RequestDescriptor) -> GatewayResponse {
        self.fetch_with_cancel(descriptor, &CancellationToken::new())
            .await
    }

    /// Fetch, abandoning the token wait, upstream call and backoff once
    /// `cancel` fires
    pub async fn fetch_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> GatewayResponse {
        let start = Instant::now();
        let result = self.try_fetch(descriptor, cancel).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.error_code(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(descriptor.category().as_str(), outcome);
        }

        match &result {
            Ok(_) => debug!(
                request = %descriptor,
                duration_ms = start.elapsed().as_millis(),
                "Fetch completed"
            ),
            Err(e) => info!(
                request = %descriptor,
                duration_ms = start.elapsed().as_millis(),
                error_code = e.error_code(),
                error = %e,
                "Fetch failed"
            ),
        }

        GatewayResponse::from(result)
    }

    /// Fetch and return the payload or typed error instead of an envelope
    ///
    /// # Errors
    /// Returns `RateLimitExceeded` when no token is available within the wait
    /// ceiling, the upstream error of the final attempt, or `Cancelled`
    #[instrument(skip_all, fields(category = %descriptor.category(), path = %descriptor.path()))]
    pub async fn try_fetch(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        let category = descriptor.category();
        let label = category.as_str();
        let cacheable = descriptor.is_cacheable() && self.cache.is_enabled();

        if cacheable {
            let cached = self.cache.get(descriptor.cache_key());
            if let Some(metrics) = &self.metrics {
                metrics.record_cache(label, cached.is_some());
            }
            if let Some(payload) = cached {
                return Ok(payload);
            }
        }

        if let Err(e) = self.rate_limiter.acquire(category, cancel).await {
            if matches!(e, GatewayError::RateLimitExceeded { .. }) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rate_limit_rejection(label);
                }
            }
            return Err(e);
        }

        let outcome = self
            .retry
            .run(self.client.as_ref(), descriptor, cancel)
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.record_retries(label, outcome.attempts.saturating_sub(1));
        }

        // An empty upstream body is stored and returned as `{}`
        let payload = match outcome.result? {
            Value::Null => Value::Object(serde_json::Map::new()),
            payload => payload,
        };
        if cacheable {
            self.cache
                .put(descriptor.cache_key(), payload.clone(), category);
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("upstream", &self.client.id())
            .field("rate_limiter", &self.rate_limiter)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    client: Arc<dyn UpstreamClient>,
    rate_limiter: Option<Arc<RateLimiter>>,
    cache: Option<Arc<ResponseCache>>,
    retry: Option<RetryController>,
    metrics: Option<Arc<Metrics>>,
}

impl GatewayBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            client,
            rate_limiter: None,
            cache: None,
            retry: None,
            metrics: None,
        }
    }

    /// Set the rate limiter
    #[must_use]
    pub fn rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(Arc::new(rate_limiter));
        self
    }

    /// Set the response cache
    #[must_use]
    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Set the retry controller
    #[must_use]
    pub fn retry(mut self, retry: RetryController) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach metrics; upstream attempts are recorded through an
    /// [`InstrumentedClient`]
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the gateway, filling unset components with defaults
    #[must_use]
    pub fn build(self) -> Gateway {
        let client = match &self.metrics {
            Some(metrics) => {
                Arc::new(InstrumentedClient::new(self.client, Arc::clone(metrics)))
                    as Arc<dyn UpstreamClient>
            }
            None => self.client,
        };

        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::with_defaults(client.id())));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResponseCache::with_defaults()));
        let retry = self.retry.unwrap_or_else(RetryController::with_defaults);

        if !rate_limiter.is_enabled() {
            warn!("Rate limiting is disabled");
        }
        info!(
            upstream = %client.id(),
            cache_enabled = cache.is_enabled(),
            max_attempts = retry.config().max_attempts,
            "Gateway initialized"
        );

        Gateway {
            client,
            rate_limiter,
            cache,
            retry,
            metrics: self.metrics,
        }
    }
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("upstream", &self.client.id())
            .finish_non_exhaustive()
    }
}
