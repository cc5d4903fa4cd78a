//! Application state shared across handlers.

use blox_config::{CredentialKind, GatewayConfig};
use blox_core::{GatewayResponse, RequestDescriptor, ResourceCategory};
use blox_gateway::Gateway;
use blox_resilience::{
    CacheConfig, RateLimiter, RateLimiterConfig, ResponseCache, RetryConfig, RetryController,
};
use blox_telemetry::Metrics;
use blox_upstream::{Credentials, HttpUpstreamClient, SecretString, UpstreamConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::ServerError;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Gateway facade
    gateway: Gateway,
    /// Loaded configuration
    config: Arc<GatewayConfig>,
    /// Process start, for uptime reporting
    started_at: Instant,
}

impl AppState {
    /// Wrap an already built gateway
    #[must_use]
    pub fn new(gateway: Gateway, config: GatewayConfig) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Build the upstream client, limiter, cache, retry controller and
    /// metrics described by `config`
    ///
    /// # Errors
    /// Returns a configuration error if metrics cannot be registered, the
    /// credentials cannot be resolved, or the HTTP client cannot be built
    pub fn from_config(config: GatewayConfig) -> Result<Self, ServerError> {
        let metrics = if config.observability.metrics.enabled {
            let metrics = Metrics::new(&config.observability.metrics)
                .map_err(|e| ServerError::Config(format!("metrics registry: {e}")))?;
            Some(Arc::new(metrics))
        } else {
            None
        };

        let client = HttpUpstreamClient::new(upstream_config(&config)?)
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let mut builder = Gateway::builder(Arc::new(client))
            .rate_limiter(rate_limiter(&config))
            .cache(ResponseCache::new(cache_config(&config)))
            .retry(RetryController::new(retry_config(&config)));
        if let Some(metrics) = metrics {
            builder = builder.metrics(metrics);
        }

        info!(
            upstream = %config.upstream.id,
            rate_limit_enabled = config.rate_limit.enabled,
            cache_enabled = config.cache.enabled,
            max_attempts = config.retry.max_attempts,
            "Gateway state initialized"
        );

        Ok(Self::new(builder.build(), config))
    }

    /// Gateway facade
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Loaded configuration
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Metrics collector, when enabled
    #[must_use]
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.gateway.metrics()
    }

    /// Time since the state was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Fetch through the gateway under the server request deadline
    ///
    /// Once the deadline passes the fetch is cancelled and resolves to a
    /// `cancelled` envelope.
    pub async fn fetch(&self, descriptor: &RequestDescriptor) -> GatewayResponse {
        let deadline = self.config.server.request_timeout;
        let cancel = CancellationToken::new();
        let fetch = self.gateway.fetch_with_cancel(descriptor, &cancel);
        tokio::pin!(fetch);

        tokio::select! {
            response = &mut fetch => response,
            () = tokio::time::sleep(deadline) => {
                warn!(
                    request = %descriptor,
                    deadline_ms = deadline.as_millis(),
                    "Request deadline exceeded, cancelling fetch"
                );
                cancel.cancel();
                fetch.await
            }
        }
    }
}

fn upstream_config(config: &GatewayConfig) -> Result<UpstreamConfig, ServerError> {
    let upstream = &config.upstream;
    let mut out = UpstreamConfig::new(upstream.id.clone());
    out.timeout = upstream.timeout;
    out.connect_timeout = upstream.connect_timeout;
    if let Some(user_agent) = &upstream.user_agent {
        out.user_agent.clone_from(user_agent);
    }

    for category in ResourceCategory::ALL {
        if let Some(url) = config.category(category).and_then(|c| c.base_url.clone()) {
            out = out.with_base_url(category, url);
        }
    }

    if let Some(credentials) = &upstream.credentials {
        let value = credentials.resolve().ok_or_else(|| {
            ServerError::Config("upstream credentials are configured but empty".to_string())
        })?;
        let secret = SecretString::new(value);
        out = out.with_credentials(match credentials.kind {
            CredentialKind::Bearer => Credentials::Bearer(secret),
            CredentialKind::Cookie => Credentials::SessionCookie(secret),
        });
    }

    Ok(out)
}

fn rate_limiter(config: &GatewayConfig) -> RateLimiter {
    let settings = &config.rate_limit;
    if !settings.enabled {
        return RateLimiter::disabled(config.upstream.id.clone());
    }

    let limiter_config = |requests_per_window, window| RateLimiterConfig {
        requests_per_window,
        window,
        enable_burst: settings.enable_burst,
        burst_multiplier: settings.burst_multiplier,
    };

    let mut limiter = RateLimiter::new(
        config.upstream.id.clone(),
        limiter_config(settings.default_requests_per_window, settings.default_window),
        settings.max_wait,
    );
    for category in config.categories.keys() {
        let (requests, window) = config.rate_for(*category);
        limiter = limiter.with_category_config(*category, limiter_config(requests, window));
    }
    limiter
}

fn cache_config(config: &GatewayConfig) -> CacheConfig {
    CacheConfig {
        enabled: config.cache.enabled,
        max_entries: config.cache.max_entries,
        ttls: config
            .categories
            .iter()
            .filter_map(|(category, c)| c.ttl.map(|ttl| (*category, ttl)))
            .collect(),
    }
}

fn retry_config(config: &GatewayConfig) -> RetryConfig {
    let retry = &config.retry;
    RetryConfig {
        max_attempts: retry.max_attempts,
        base_delay: retry.base_delay,
        max_delay: retry.max_delay,
        jitter_ratio: retry.jitter_ratio,
        max_retry_after: retry.max_retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blox_config::{CategoryConfig, CredentialsConfig};

    #[test]
    fn test_category_overrides_applied() {
        let mut config = GatewayConfig::default();
        config.categories.insert(
            ResourceCategory::Presence,
            CategoryConfig {
                base_url: Some("http://127.0.0.1:9000".to_string()),
                ttl: Some(Duration::from_secs(5)),
                requests_per_window: Some(10),
                window: Some(Duration::from_secs(1)),
            },
        );

        let upstream = upstream_config(&config).unwrap();
        assert_eq!(
            upstream.base_url_for(ResourceCategory::Presence),
            "http://127.0.0.1:9000"
        );
        assert_eq!(
            upstream.base_url_for(ResourceCategory::Users),
            ResourceCategory::Users.default_base_url()
        );

        let cache = cache_config(&config);
        assert_eq!(cache.ttl_for(ResourceCategory::Presence), Duration::from_secs(5));
        assert_eq!(
            cache.ttl_for(ResourceCategory::Users),
            ResourceCategory::Users.default_ttl()
        );

        let limiter = rate_limiter(&config);
        assert_eq!(limiter.config_for(ResourceCategory::Presence).requests_per_window, 10);
        assert_eq!(limiter.config_for(ResourceCategory::Users).requests_per_window, 60);
    }

    #[test]
    fn test_disabled_rate_limit() {
        let mut config = GatewayConfig::default();
        config.rate_limit.enabled = false;

        assert!(!rate_limiter(&config).is_enabled());
    }

    #[test]
    fn test_unresolvable_credentials_rejected() {
        let mut config = GatewayConfig::default();
        config.upstream.credentials = Some(CredentialsConfig {
            kind: CredentialKind::Cookie,
            value: None,
            value_env: Some("BLOX_GATEWAY_TEST_MISSING_COOKIE".to_string()),
        });

        assert!(matches!(upstream_config(&config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_from_config_builds_state() {
        let state = AppState::from_config(GatewayConfig::default()).unwrap();

        assert!(state.gateway().cache().is_enabled());
        assert!(state.gateway().rate_limiter().is_enabled());
        assert_eq!(state.gateway().retry().config().max_attempts, 3);
    }
}
