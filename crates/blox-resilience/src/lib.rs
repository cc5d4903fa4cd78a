//! # Blox Resilience
//!
//! Resilience patterns sitting between the gateway facade and the upstream:
//! - Rate limiting with a token bucket per resource category
//! - Response caching with per-category TTLs
//! - Retry with exponential backoff, jitter and `Retry-After` support
//! - Pluggable sleeping so backoff can be observed in tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod rate_limiter;
pub mod retry;
pub mod sleeper;

// Re-export main types
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use rate_limiter::{BucketStats, RateLimiter, RateLimiterConfig, RatePermit};
pub use retry::{RetryConfig, RetryController, RetryOutcome};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
