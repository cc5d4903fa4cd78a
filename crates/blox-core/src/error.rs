//! Error types and handling for the gateway.
//!
//! Every failure below the facade resolves to a [`GatewayError`]. Each variant
//! maps to a stable machine-readable code and an HTTP status, so callers never
//! see upstream bodies, stack traces or internal limiter/cache state.

use crate::category::ResourceCategory;
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `GatewayError`
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Maximum length of an upstream-supplied message carried in an error
pub const MAX_UPSTREAM_MESSAGE_LEN: usize = 200;

/// Typed failure of a gateway call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No rate-limit token became available before the wait ceiling
    #[error("Rate limit exceeded for category '{category}'")]
    RateLimitExceeded {
        /// Category whose budget was exhausted
        category: ResourceCategory,
        /// Estimated wait until a token would have been available
        retry_after: Option<Duration>,
    },

    /// Retries exhausted on 429/5xx/timeout responses
    #[error("Upstream request failed after {attempts} attempt(s): {message}")]
    UpstreamTransient {
        /// Message of the last failure
        message: String,
        /// Upstream status of the last failure, if one was received
        status: Option<u16>,
        /// Number of attempts made
        attempts: u32,
        /// Whether the last attempt timed out
        timed_out: bool,
    },

    /// Non-retryable 4xx from upstream
    #[error("Upstream rejected the request ({status}): {message}")]
    UpstreamPermanent {
        /// Upstream error message
        message: String,
        /// Upstream status code
        status: u16,
    },

    /// Connection-level failures persisted through every retry
    #[error("Upstream unreachable after {attempts} attempt(s): {message}")]
    UpstreamUnreachable {
        /// Message of the last connection failure
        message: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The caller's deadline or cancellation signal fired
    #[error("Request cancelled")]
    Cancelled,

    /// The request could not be turned into an upstream call
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// Internal server error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTransient { timed_out, .. } => {
                if *timed_out {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            Self::UpstreamPermanent { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(StatusCode::is_client_error)
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::UpstreamUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the stable error code for programmatic handling
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::UpstreamTransient { .. } => "upstream_transient_error",
            Self::UpstreamPermanent { .. } => "upstream_permanent_error",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::Cancelled => "request_cancelled",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Check whether a caller retrying later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::UpstreamTransient { .. }
                | Self::UpstreamUnreachable { .. }
        )
    }

    /// Create a rate limit error
    #[must_use]
    pub fn rate_limited(category: ResourceCategory, retry_after: Option<Duration>) -> Self {
        Self::RateLimitExceeded {
            category,
            retry_after,
        }
    }

    /// Create a transient upstream error
    #[must_use]
    pub fn upstream_transient(
        message: impl Into<String>,
        status: Option<u16>,
        attempts: u32,
        timed_out: bool,
    ) -> Self {
        Self::UpstreamTransient {
            message: truncate_message(message.into()),
            status,
            attempts,
            timed_out,
        }
    }

    /// Create a permanent upstream error
    #[must_use]
    pub fn upstream_permanent(message: impl Into<String>, status: u16) -> Self {
        Self::UpstreamPermanent {
            message: truncate_message(message.into()),
            status,
        }
    }

    /// Create an unreachable upstream error
    #[must_use]
    pub fn upstream_unreachable(message: impl Into<String>, attempts: u32) -> Self {
        Self::UpstreamUnreachable {
            message: truncate_message(message.into()),
            attempts,
        }
    }

    /// Create an invalid request error
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Cut a message down to [`MAX_UPSTREAM_MESSAGE_LEN`] characters
#[must_use]
pub fn truncate_message(message: String) -> String {
    if message.chars().count() <= MAX_UPSTREAM_MESSAGE_LEN {
        return message;
    }
    message.chars().take(MAX_UPSTREAM_MESSAGE_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::rate_limited(ResourceCategory::Games, None).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::upstream_transient("boom", Some(503), 3, false).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::upstream_transient("slow", None, 3, true).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::upstream_unreachable("refused", 3).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::Cancelled.status_code(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            GatewayError::invalid_request("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_permanent_status_passthrough() {
        assert_eq!(
            GatewayError::upstream_permanent("not found", 404).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::upstream_permanent("forbidden", 403).status_code(),
            StatusCode::FORBIDDEN
        );
        // A non-4xx permanent failure (e.g. malformed 2xx body) is a bad gateway
        assert_eq!(
            GatewayError::upstream_permanent("invalid json", 502).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(GatewayError::rate_limited(ResourceCategory::Users, None).is_retryable());
        assert!(GatewayError::upstream_transient("x", Some(500), 3, false).is_retryable());
        assert!(GatewayError::upstream_unreachable("x", 3).is_retryable());
        assert!(!GatewayError::upstream_permanent("x", 400).is_retryable());
        assert!(!GatewayError::Cancelled.is_retryable());
        assert!(!GatewayError::internal("x").is_retryable());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            GatewayError::rate_limited(ResourceCategory::Users, None).error_code(),
            "rate_limit_exceeded"
        );
        assert_eq!(
            GatewayError::upstream_permanent("x", 404).error_code(),
            "upstream_permanent_error"
        );
        assert_eq!(GatewayError::Cancelled.error_code(), "request_cancelled");
    }

    #[test]
    fn test_upstream_message_truncated() {
        let long = "x".repeat(500);
        let err = GatewayError::upstream_permanent(long, 400);
        match err {
            GatewayError::UpstreamPermanent { message, .. } => {
                assert_eq!(message.len(), MAX_UPSTREAM_MESSAGE_LEN);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
