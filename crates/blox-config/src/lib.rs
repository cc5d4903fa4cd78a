//! # Blox Gateway Configuration
//!
//! Configuration management for the Blox API gateway, including:
//! - Configuration schema and validation
//! - Loading from YAML, TOML and JSON, merged in order
//! - Environment variable substitution and `BLOX_GATEWAY_*` overrides

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod schema;

// Re-export main types
pub use loader::{load_config, ConfigError, ConfigLoader, ConfigSource, ENV_PREFIX};
pub use schema::{
    CacheConfig, CategoryConfig, CorsConfig, CredentialKind, CredentialsConfig, GatewayConfig,
    ObservabilityConfig, RateLimitConfig, RetryConfig, ServerConfig, UpstreamConfig,
};
