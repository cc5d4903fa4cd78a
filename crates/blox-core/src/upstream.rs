//! Upstream client abstraction.
//!
//! The gateway talks to the upstream platform only through [`UpstreamClient`].
//! A client never returns `Err`: every outcome of one HTTP attempt, including
//! connection failures and timeouts, is classified into an [`UpstreamResult`].

use crate::descriptor::RequestDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Classified outcome of exactly one upstream attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResult {
    /// 2xx with a JSON body
    Success {
        /// Parsed response body
        payload: Value,
        /// Upstream status code
        status: u16,
    },

    /// Failure likely to succeed on retry (429, 5xx, connection errors)
    TransientFailure {
        /// Failure message
        message: String,
        /// Upstream status, `None` for connection-level failures
        status: Option<u16>,
        /// Server-requested delay before the next attempt
        retry_after: Option<Duration>,
    },

    /// Failure that retrying will not fix (4xx other than 429, malformed body)
    PermanentFailure {
        /// Failure message
        message: String,
        /// Upstream status code
        status: u16,
    },

    /// The per-call timeout elapsed before a response arrived
    Timeout {
        /// Timeout that elapsed
        after: Duration,
    },
}

impl UpstreamResult {
    /// Successful result
    #[must_use]
    pub fn success(payload: Value) -> Self {
        Self::Success {
            payload,
            status: 200,
        }
    }

    /// Transient failure with an upstream status
    #[must_use]
    pub fn transient(message: impl Into<String>, status: u16) -> Self {
        Self::TransientFailure {
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    /// Connection-level failure (no response received)
    #[must_use]
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::TransientFailure {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Permanent failure
    #[must_use]
    pub fn permanent(message: impl Into<String>, status: u16) -> Self {
        Self::PermanentFailure {
            message: message.into(),
            status,
        }
    }

    /// Attach a server-requested retry delay to a transient failure
    #[must_use]
    pub fn with_retry_after(self, delay: Duration) -> Self {
        match self {
            Self::TransientFailure {
                message, status, ..
            } => Self::TransientFailure {
                message,
                status,
                retry_after: Some(delay),
            },
            other => other,
        }
    }

    /// Check if this is a success
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFailure { .. } | Self::Timeout { .. })
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::TransientFailure { status: None, .. } => "unreachable",
            Self::TransientFailure { .. } => "transient",
            Self::PermanentFailure { .. } => "permanent",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for UpstreamResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { status, .. } => write!(f, "success ({status})"),
            Self::TransientFailure {
                message,
                status: Some(status),
                ..
            } => write!(f, "transient failure ({status}): {message}"),
            Self::TransientFailure { message, .. } => write!(f, "unreachable: {message}"),
            Self::PermanentFailure { message, status } => {
                write!(f, "permanent failure ({status}): {message}")
            }
            Self::Timeout { after } => write!(f, "timed out after {after:?}"),
        }
    }
}

/// Performs single upstream attempts
///
/// Implementations issue exactly one HTTP request per call and never retry;
/// retries belong to the retry controller.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// Perform one attempt for the descriptor
    async fn call(&self, descriptor: &RequestDescriptor) -> UpstreamResult;
}
