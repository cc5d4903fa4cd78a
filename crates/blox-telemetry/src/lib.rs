//! # Blox Telemetry
//!
//! Observability for the gateway:
//! - Structured logging through `tracing`
//! - Prometheus metrics for fetches, upstream attempts, cache and rate limiting

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::{Metrics, MetricsConfig, METRICS_NAMESPACE};
