//! Configuration schema definitions.
//!
//! This module defines all configuration types with validation and defaults.

use blox_core::ResourceCategory;
use blox_telemetry::{LoggingConfig, MetricsConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::{Validate, ValidationError, ValidationErrors};

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Upstream client configuration
    #[validate(nested)]
    pub upstream: UpstreamConfig,

    /// Per-category overrides; unlisted categories use built-in defaults
    pub categories: HashMap<ResourceCategory, CategoryConfig>,

    /// Rate limiting configuration
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,

    /// Retry configuration
    #[validate(nested)]
    pub retry: RetryConfig,

    /// Response cache configuration
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Validate the configuration, including every category override
    ///
    /// # Errors
    /// Returns validation errors if configuration is invalid
    pub fn validate_config(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        for category in self.categories.values() {
            category.validate()?;
        }
        Ok(())
    }

    /// Override for a category, if configured
    #[must_use]
    pub fn category(&self, category: ResourceCategory) -> Option<&CategoryConfig> {
        self.categories.get(&category)
    }

    /// Cache TTL for a category
    #[must_use]
    pub fn ttl_for(&self, category: ResourceCategory) -> Duration {
        self.category(category)
            .and_then(|c| c.ttl)
            .unwrap_or_else(|| category.default_ttl())
    }

    /// Upstream base URL for a category
    #[must_use]
    pub fn base_url_for(&self, category: ResourceCategory) -> String {
        self.category(category)
            .and_then(|c| c.base_url.clone())
            .unwrap_or_else(|| category.default_base_url().to_string())
    }

    /// Requests allowed per window for a category, and the window
    #[must_use]
    pub fn rate_for(&self, category: ResourceCategory) -> (u32, Duration) {
        let overrides = self.category(category);
        (
            overrides
                .and_then(|c| c.requests_per_window)
                .unwrap_or(self.rate_limit.default_requests_per_window),
            overrides
                .and_then(|c| c.window)
                .unwrap_or(self.rate_limit.default_window),
        )
    }
}

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("non_zero_duration"));
    }
    Ok(())
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Deadline applied to every fetch made on behalf of an inbound request
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub request_timeout: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,

    /// Maximum request body size in bytes
    pub max_request_body_size: usize,

    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            graceful_shutdown_timeout: Duration::from_secs(30),
            max_request_body_size: 1024 * 1024, // 1MB
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Whether CORS is enabled
    pub enabled: bool,

    /// Allowed origins
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache, in seconds
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            max_age: 86400,
        }
    }
}

/// Upstream client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Identifier used in logs and metrics
    #[validate(length(min = 1, max = 64))]
    pub id: String,

    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub timeout: Duration,

    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header; the built-in value is used when unset
    pub user_agent: Option<String>,

    /// Credentials attached to every call
    pub credentials: Option<CredentialsConfig>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            id: "roblox".to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: None,
            credentials: None,
        }
    }
}

/// How credentials are presented upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// `Authorization: Bearer` header
    Bearer,
    /// `.ROBLOSECURITY` session cookie
    Cookie,
}

/// Upstream credentials (value or env var reference)
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Credential kind
    pub kind: CredentialKind,

    /// The value, or an env var reference like `${ROBLOX_COOKIE}`
    #[serde(default)]
    pub value: Option<String>,

    /// Environment variable holding the value
    #[serde(default)]
    pub value_env: Option<String>,
}

impl CredentialsConfig {
    /// Resolve the value from config or environment
    #[must_use]
    pub fn resolve(&self) -> Option<String> {
        if let Some(ref value) = self.value {
            if let Some(env_var) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
                return std::env::var(env_var).ok();
            }
            return Some(value.clone());
        }

        if let Some(ref env_var) = self.value_env {
            return std::env::var(env_var).ok();
        }

        None
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("kind", &self.kind)
            .field("value", &self.value.as_ref().map(|_| "[REDACTED]"))
            .field("value_env", &self.value_env)
            .finish()
    }
}

/// Per-category overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_category_window"))]
pub struct CategoryConfig {
    /// Upstream base URL
    #[validate(url)]
    pub base_url: Option<String>,

    /// Cache TTL; zero disables caching for the category
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Requests allowed per window
    #[validate(range(min = 1))]
    pub requests_per_window: Option<u32>,

    /// Rate window; must be non-zero when set
    #[serde(with = "humantime_serde")]
    pub window: Option<Duration>,
}

fn validate_category_window(config: &CategoryConfig) -> Result<(), ValidationError> {
    match config.window {
        Some(window) => non_zero_duration(&window),
        None => Ok(()),
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,

    /// Requests per window for categories without an override
    #[validate(range(min = 1))]
    pub default_requests_per_window: u32,

    /// Window for categories without an override
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub default_window: Duration,

    /// Longest time a fetch waits for a token before failing
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,

    /// Allow bursts above the steady rate
    pub enable_burst: bool,

    /// Bucket capacity multiplier when bursts are enabled
    #[validate(range(min = 1.0, max = 10.0))]
    pub burst_multiplier: f32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_requests_per_window: 60,
            default_window: Duration::from_secs(60),
            max_wait: Duration::from_secs(5),
            enable_burst: false,
            burst_multiplier: 1.5,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Maximum computed backoff
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter as a fraction of the delay
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter_ratio: f64,

    /// Upper bound for honoured `Retry-After` values
    #[serde(with = "humantime_serde")]
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.2,
            max_retry_after: Duration::from_secs(30),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Maximum number of cached responses
    #[validate(range(min = 1))]
    pub max_entries: usize,

    /// Interval between sweeps of expired entries
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}
