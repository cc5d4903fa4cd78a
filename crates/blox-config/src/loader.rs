//! Configuration loading from files and environment.
//!
//! Sources are parsed into JSON values and deep-merged in order, so a later
//! source only needs to name the keys it changes. `${VAR}` and
//! `${VAR:-default}` references in files are substituted before parsing, and
//! `<PREFIX>_*` environment variables are applied last.

use crate::schema::{GatewayConfig, ServerConfig};
use blox_telemetry::LogFormat;
use regex::{Captures, Regex};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Prefix of environment overrides read by [`load_config`]
pub const ENV_PREFIX: &str = "BLOX_GATEWAY";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path to the file that was not found
        path: String,
    },

    /// IO error
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unsupported format
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// The file extension that was not supported
        extension: String,
    },

    /// Environment override with an unparseable value
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvValue {
        /// Variable name
        name: String,
        /// The rejected value
        value: String,
    },

    /// Substitution pattern failed to compile
    #[error("Environment substitution failed: {0}")]
    Substitution(#[from] regex::Error),
}

/// Configuration source
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path
    File(String),
    /// Raw YAML string
    Yaml(String),
    /// Raw TOML string
    Toml(String),
    /// Raw JSON string
    Json(String),
    /// Default configuration
    Default,
}

/// Configuration loader
#[derive(Debug, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Create a new config loader
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration source
    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file source
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.with_source(ConfigSource::File(path.into()))
    }

    /// Set environment variable prefix for overrides
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Load configuration from all sources
    ///
    /// # Errors
    /// Returns error if any source fails to load or validate
    pub async fn load(self) -> Result<GatewayConfig, ConfigError> {
        let mut merged = serde_json::to_value(GatewayConfig::default())?;

        for source in &self.sources {
            let value = Self::load_source(source).await?;
            merge_values(&mut merged, value);
        }

        let mut config: GatewayConfig = serde_json::from_value(merged)?;

        if let Some(ref prefix) = self.env_prefix {
            Self::apply_env_overrides(&mut config, prefix, |name| std::env::var(name).ok())?;
        }

        config
            .validate_config()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        info!(
            sources = self.sources.len(),
            categories = config.categories.len(),
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Load a single source as an untyped value
    async fn load_source(source: &ConfigSource) -> Result<Value, ConfigError> {
        match source {
            ConfigSource::File(path) => Self::load_file(path).await,
            ConfigSource::Yaml(content) => Self::parse_yaml(content),
            ConfigSource::Toml(content) => Self::parse_toml(content),
            ConfigSource::Json(content) => Self::parse_json(content),
            ConfigSource::Default => Ok(serde_json::to_value(GatewayConfig::default())?),
        }
    }

    /// Load configuration from a file
    async fn load_file(path: &str) -> Result<Value, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = fs::read_to_string(path).await?;
        let content = substitute_env_vars(&content)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        debug!(path = %path.display(), format = %extension, "Loading configuration file");

        match extension.as_str() {
            "yaml" | "yml" => Self::parse_yaml(&content),
            "toml" => Self::parse_toml(&content),
            "json" => Self::parse_json(&content),
            ext => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    fn parse_yaml(content: &str) -> Result<Value, ConfigError> {
        // An empty document means "no overrides"
        let value: Option<Value> = serde_yaml::from_str(content)?;
        Ok(value.unwrap_or(Value::Null))
    }

    fn parse_toml(content: &str) -> Result<Value, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn parse_json(content: &str) -> Result<Value, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `<PREFIX>_*` overrides read through `lookup`
    fn apply_env_overrides(
        config: &mut GatewayConfig,
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, host)) = var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some((name, port)) = var("SERVER_PORT") {
            config.server.port = parse_env(&name, &port)?;
        }
        if let Some((name, timeout)) = var("SERVER_REQUEST_TIMEOUT") {
            config.server.request_timeout = parse_env_duration(&name, &timeout)?;
        }
        if let Some((name, timeout)) = var("UPSTREAM_TIMEOUT") {
            config.upstream.timeout = parse_env_duration(&name, &timeout)?;
        }
        if let Some((name, enabled)) = var("RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = parse_env(&name, &enabled)?;
        }
        if let Some((name, max_wait)) = var("RATE_LIMIT_MAX_WAIT") {
            config.rate_limit.max_wait = parse_env_duration(&name, &max_wait)?;
        }
        if let Some((name, attempts)) = var("RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_env(&name, &attempts)?;
        }
        if let Some((name, enabled)) = var("CACHE_ENABLED") {
            config.cache.enabled = parse_env(&name, &enabled)?;
        }
        if let Some((_, level)) = var("LOG_LEVEL") {
            config.observability.logging.level = level;
        }
        if let Some((name, format)) = var("LOG_FORMAT") {
            config.observability.logging.format =
                format
                    .parse::<LogFormat>()
                    .map_err(|_| ConfigError::InvalidEnvValue {
                        name,
                        value: format.clone(),
                    })?;
        }
        if let Some((name, enabled)) = var("METRICS_ENABLED") {
            config.observability.metrics.enabled = parse_env(&name, &enabled)?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_env_duration(name: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim()).map_err(|_| {
        ConfigError::InvalidEnvValue {
            name: name.to_string(),
            value: value.to_string(),
        }
    })
}

/// Substitute environment variables in content
///
/// Supports `${VAR}` and `${VAR:-default}`; unresolved references without a
/// default are left in place.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;

    let result = re.replace_all(content, |caps: &Captures<'_>| {
        let full_match = caps.get(0).map_or("", |m| m.as_str());
        let var_spec = caps.get(1).map_or("", |m| m.as_str());

        let (var_name, default) = match var_spec.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (var_spec, None),
        };

        match (std::env::var(var_name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                warn!(variable = %var_name, "Environment variable not found");
                full_match.to_string()
            }
        }
    });

    Ok(result.into_owned())
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Load configuration from default locations
///
/// Looks for configuration in order:
/// 1. Path from CONFIG_PATH environment variable
/// 2. ./config.yaml, ./config.yml
/// 3. ./config/default.yaml, ./config/default.yml
///
/// `BLOX_GATEWAY_*` environment overrides are applied in every case.
///
/// # Errors
/// Returns error if the configured file is missing, unparseable or invalid
pub async fn load_config() -> Result<GatewayConfig, ConfigError> {
    let loader = ConfigLoader::new().with_env_prefix(ENV_PREFIX);

    if let Ok(path) = std::env::var("CONFIG_PATH") {
        info!(path = %path, "Loading configuration from CONFIG_PATH");
        return loader.with_file(path).load().await;
    }

    let search_paths = [
        "config.yaml",
        "config.yml",
        "config/default.yaml",
        "config/default.yml",
    ];

    for path in search_paths {
        if Path::new(path).exists() {
            info!(path = %path, "Loading configuration");
            return loader.with_file(path).load().await;
        }
    }

    warn!(
        port = ServerConfig::default().port,
        "No configuration file found, using defaults"
    );
    loader.with_source(ConfigSource::Default).load().await
}
