//! Prometheus metrics for the gateway.
//!
//! Provides metrics for:
//! - Fetch outcomes per resource category
//! - Upstream attempts and their latency
//! - Cache hits and misses
//! - Rate limit rejections and retries

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

/// Namespace prefixed to every metric name
pub const METRICS_NAMESPACE: &str = "blox_gateway";

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
    /// Metrics path for HTTP endpoint
    pub path: String,
    /// Histogram buckets for upstream latency
    pub latency_buckets: Vec<f64>,
    /// Constant labels added to all metrics
    pub labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
            latency_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
            labels: HashMap::new(),
        }
    }
}

/// Main metrics registry and collectors
pub struct Metrics {
    registry: Registry,
    /// Facade fetches by category and outcome
    fetch_total: IntCounterVec,
    /// Individual upstream attempts by category and result kind
    upstream_requests_total: IntCounterVec,
    /// Upstream attempt latency
    upstream_latency: HistogramVec,
    /// Cache lookups by category and hit/miss
    cache_operations: IntCounterVec,
    /// Requests rejected by the rate limiter
    rate_limit_rejections: IntCounterVec,
    /// Retries performed after a first failed attempt
    retries_total: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new metrics instance with its own registry
    ///
    /// # Errors
    /// Returns error if metrics cannot be registered
    pub fn new(config: &MetricsConfig) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(None, Some(config.labels.clone()))?;

        let fetch_total = IntCounterVec::new(
            Opts::new("fetch_total", "Gateway fetches by outcome").namespace(METRICS_NAMESPACE),
            &["category", "outcome"],
        )?;
        registry.register(Box::new(fetch_total.clone()))?;

        let upstream_requests_total = IntCounterVec::new(
            Opts::new("upstream_requests_total", "Upstream attempts by result")
                .namespace(METRICS_NAMESPACE),
            &["category", "result"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new(
                "upstream_latency_seconds",
                "Upstream attempt latency in seconds",
            )
            .namespace(METRICS_NAMESPACE)
            .buckets(config.latency_buckets.clone()),
            &["category"],
        )?;
        registry.register(Box::new(upstream_latency.clone()))?;

        let cache_operations = IntCounterVec::new(
            Opts::new("cache_operations_total", "Cache lookups").namespace(METRICS_NAMESPACE),
            &["category", "result"],
        )?;
        registry.register(Box::new(cache_operations.clone()))?;

        let rate_limit_rejections = IntCounterVec::new(
            Opts::new(
                "rate_limit_rejections_total",
                "Requests rejected by the rate limiter",
            )
            .namespace(METRICS_NAMESPACE),
            &["category"],
        )?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Upstream retries performed").namespace(METRICS_NAMESPACE),
            &["category"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        info!("Metrics initialized");

        Ok(Self {
            registry,
            fetch_total,
            upstream_requests_total,
            upstream_latency,
            cache_operations,
            rate_limit_rejections,
            retries_total,
        })
    }

    /// Record a completed fetch; `outcome` is `success` or an error code
    pub fn record_fetch(&self, category: &str, outcome: &str) {
        self.fetch_total
            .with_label_values(&[category, outcome])
            .inc();
    }

    /// Record one upstream attempt
    pub fn record_upstream(&self, category: &str, result: &str, latency: Duration) {
        self.upstream_requests_total
            .with_label_values(&[category, result])
            .inc();
        self.upstream_latency
            .with_label_values(&[category])
            .observe(latency.as_secs_f64());
    }

    /// Record a cache lookup
    pub fn record_cache(&self, category: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_operations
            .with_label_values(&[category, result])
            .inc();
    }

    /// Record a rate limit rejection
    pub fn record_rate_limit_rejection(&self, category: &str) {
        self.rate_limit_rejections
            .with_label_values(&[category])
            .inc();
    }

    /// Record retries performed for one fetch
    pub fn record_retries(&self, category: &str, retries: u32) {
        if retries == 0 {
            return;
        }
        self.retries_total
            .with_label_values(&[category])
            .inc_by(u64::from(retries));
    }

    /// Get metrics as Prometheus text format
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get the Prometheus registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
