//! HTTP upstream client built on reqwest.
//!
//! Each call issues exactly one request and classifies whatever happens into
//! an [`UpstreamResult`]: 2xx with a JSON body is a success, 429/408/5xx and
//! connection failures are transient, other 4xx are permanent, and an
//! elapsed per-call timeout is reported as a timeout.

use async_trait::async_trait;
use blox_core::error::truncate_message;
use blox_core::{GatewayError, RequestDescriptor, ResourceCategory, UpstreamClient, UpstreamResult};
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, RETRY_AFTER};
use http::StatusCode;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Default user agent sent upstream
pub const DEFAULT_USER_AGENT: &str = concat!("blox-gateway/", env!("CARGO_PKG_VERSION"));

/// Credentials attached to every upstream call
#[derive(Debug, Clone)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Bearer(SecretString),
    /// `.ROBLOSECURITY` session cookie
    SessionCookie(SecretString),
}

/// Upstream client configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Client instance ID, used in logs
    pub id: String,
    /// Per-call timeout
    pub timeout: Duration,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// User agent header
    pub user_agent: String,
    /// Base URL overrides per category; others use the category default
    pub base_urls: HashMap<ResourceCategory, String>,
    /// Optional credentials
    pub credentials: Option<Credentials>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            id: "roblox".to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            base_urls: HashMap::new(),
            credentials: None,
        }
    }
}

impl UpstreamConfig {
    /// Create a configuration with defaults and the given ID
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Route one category to a different host
    #[must_use]
    pub fn with_base_url(mut self, category: ResourceCategory, url: impl Into<String>) -> Self {
        self.base_urls.insert(category, url.into());
        self
    }

    /// Route every category to one host
    #[must_use]
    pub fn with_base_url_for_all(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        for category in ResourceCategory::ALL {
            self.base_urls.insert(category, url.clone());
        }
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Base URL serving a category
    #[must_use]
    pub fn base_url_for(&self, category: ResourceCategory) -> &str {
        self.base_urls
            .get(&category)
            .map_or_else(|| category.default_base_url(), String::as_str)
    }
}

/// Upstream client performing real HTTP calls
pub struct HttpUpstreamClient {
    config: UpstreamConfig,
    client: Client,
}

impl HttpUpstreamClient {
    /// Create a new client
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created
    pub fn new(config: UpstreamConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Full URL (without query) for a descriptor
    #[must_use]
    pub fn url_for(&self, descriptor: &RequestDescriptor) -> String {
        format!(
            "{}{}",
            self.config
                .base_url_for(descriptor.category())
                .trim_end_matches('/'),
            descriptor.path()
        )
    }

    fn classify_send_error(&self, descriptor: &RequestDescriptor, err: &reqwest::Error) -> UpstreamResult {
        if err.is_timeout() {
            warn!(
                upstream = %self.config.id,
                request = %descriptor,
                timeout_ms = self.config.timeout.as_millis(),
                "Upstream call timed out"
            );
            return UpstreamResult::Timeout {
                after: self.config.timeout,
            };
        }

        warn!(
            upstream = %self.config.id,
            request = %descriptor,
            error = %err,
            "Upstream unreachable"
        );
        let kind = if err.is_connect() {
            "Connection failed"
        } else {
            "Request failed"
        };
        UpstreamResult::unreachable(format!("{kind}: {err}"))
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn call(&self, descriptor: &RequestDescriptor) -> UpstreamResult {
        let url = self.url_for(descriptor);

        debug!(
            upstream = %self.config.id,
            method = %descriptor.method(),
            url = %url,
            "Sending upstream request"
        );

        let mut req_builder = self
            .client
            .request(descriptor.method().clone(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if !descriptor.query().is_empty() {
            req_builder = req_builder.query(descriptor.query());
        }

        match &self.config.credentials {
            Some(Credentials::Bearer(token)) => {
                req_builder =
                    req_builder.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
            }
            Some(Credentials::SessionCookie(cookie)) => {
                req_builder = req_builder
                    .header(COOKIE, format!(".ROBLOSECURITY={}", cookie.expose_secret()));
            }
            None => {}
        }

        if let Some(body) = descriptor.body() {
            req_builder = req_builder.json(body);
        }

        let response = match req_builder.send().await {
            Ok(response) => response,
            Err(e) => return self.classify_send_error(descriptor, &e),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return self.classify_send_error(descriptor, &e),
        };

        let result = classify_response(status, &headers, &body);
        if !result.is_success() {
            warn!(
                upstream = %self.config.id,
                request = %descriptor,
                status = status.as_u16(),
                result = result.kind(),
                "Upstream returned an error"
            );
        }
        result
    }
}

impl std::fmt::Debug for HttpUpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpstreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Whether another attempt at this status may succeed
#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Classify a received response
#[must_use]
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> UpstreamResult {
    if status.is_success() {
        if body.iter().all(u8::is_ascii_whitespace) {
            return UpstreamResult::Success {
                payload: Value::Object(serde_json::Map::new()),
                status: status.as_u16(),
            };
        }
        return match serde_json::from_slice::<Value>(body) {
            Ok(payload) => UpstreamResult::Success {
                payload,
                status: status.as_u16(),
            },
            Err(e) => UpstreamResult::permanent(
                format!("Upstream returned invalid JSON: {e}"),
                StatusCode::BAD_GATEWAY.as_u16(),
            ),
        };
    }

    let message = extract_error_message(status, body);

    if is_transient_status(status) {
        let result = UpstreamResult::transient(message, status.as_u16());
        return match parse_retry_after(headers) {
            Some(delay) => result.with_retry_after(delay),
            None => result,
        };
    }

    UpstreamResult::permanent(message, status.as_u16())
}

/// Pull a human-readable message out of an upstream error body
///
/// Looks at `message`, then `errors[0].message`, falling back to the status
/// reason phrase. Raw bodies are never passed through.
#[must_use]
pub fn extract_error_message(status: StatusCode, body: &[u8]) -> String {
    let from_body = serde_json::from_slice::<Value>(body).ok().and_then(|json| {
        json.get("message")
            .and_then(Value::as_str)
            .or_else(|| {
                json.get("errors")
                    .and_then(|errors| errors.get(0))
                    .and_then(|first| first.get("message"))
                    .and_then(Value::as_str)
            })
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
    });

    let message = from_body.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => reason.to_string(),
        None => format!("Upstream returned status {}", status.as_u16()),
    });
    truncate_message(message)
}

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
