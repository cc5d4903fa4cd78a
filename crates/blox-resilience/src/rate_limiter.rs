//! Rate limiting using the token bucket algorithm.
//!
//! One bucket per resource category. Tokens refill continuously at
//! `requests_per_window / window`; `acquire` takes one token, waiting for a
//! refill when the bucket is empty, and fails with `RateLimitExceeded` when the
//! wait would exceed the configured ceiling.
//!
//! Each bucket sits behind its own mutex, so categories never contend with each
//! other, and the mutex is never held across an await point.

use blox_core::{GatewayError, ResourceCategory};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shortest wait between refill checks, guards against float rounding spins
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Rate limiter configuration for one category
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Requests per window (e.g., requests per minute)
    pub requests_per_window: u32,
    /// Window duration
    pub window: Duration,
    /// Whether to enable burst handling
    pub enable_burst: bool,
    /// Burst multiplier (e.g., 1.5 means 50% more for bursts)
    pub burst_multiplier: f32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window: Duration::from_secs(60),
            enable_burst: false,
            burst_multiplier: 1.0,
        }
    }
}

impl RateLimiterConfig {
    /// Configuration allowing `requests_per_window` per `window` without burst
    #[must_use]
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            ..Self::default()
        }
    }

    /// Maximum number of tokens a bucket can hold
    #[must_use]
    pub fn capacity(&self) -> f64 {
        let burst_mult = if self.enable_burst {
            f64::from(self.burst_multiplier).max(1.0)
        } else {
            1.0
        };
        f64::from(self.requests_per_window) * burst_mult
    }

    /// Tokens added per second
    #[must_use]
    pub fn refill_per_sec(&self) -> f64 {
        let window_secs = self.window.as_secs_f64();
        if window_secs > 0.0 {
            f64::from(self.requests_per_window) / window_secs
        } else {
            0.0
        }
    }
}

/// Token bucket state for a single category
#[derive(Debug)]
struct TokenBucket {
    /// Available tokens, never negative
    tokens: f64,
    /// Last refill time
    last_refill: Instant,
    /// Configuration for this bucket
    config: RateLimiterConfig,
}

impl TokenBucket {
    fn new(config: RateLimiterConfig) -> Self {
        Self {
            tokens: config.capacity(),
            last_refill: Instant::now(),
            config,
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.config.refill_per_sec())
            .min(self.config.capacity());
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_consume(&mut self, now: Instant) -> Result<(), Option<Duration>> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        Err(self.estimate_wait())
    }

    /// Time until one token is available, `None` if the bucket never refills
    fn estimate_wait(&self) -> Option<Duration> {
        let rate = self.config.refill_per_sec();
        if rate <= 0.0 {
            return None;
        }
        let secs = (1.0 - self.tokens).max(0.0) / rate;
        Some(Duration::from_secs_f64(secs).max(MIN_WAIT))
    }

    fn stats(&self, category: ResourceCategory) -> BucketStats {
        BucketStats {
            category,
            tokens_available: self.tokens,
            capacity: self.config.capacity(),
            requests_per_window: self.config.requests_per_window,
            window_secs: self.config.window.as_secs_f64(),
        }
    }
}

/// Bucket statistics
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    /// Category the bucket belongs to
    pub category: ResourceCategory,
    /// Available tokens
    pub tokens_available: f64,
    /// Bucket capacity
    pub capacity: f64,
    /// Requests per window limit
    pub requests_per_window: u32,
    /// Window length in seconds
    pub window_secs: f64,
}

impl BucketStats {
    /// Percentage of capacity currently consumed
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity <= 0.0 {
            return 0.0;
        }
        ((self.capacity - self.tokens_available) / self.capacity * 100.0).max(0.0)
    }
}

/// Proof that a token was granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePermit {
    /// Category the token was drawn from
    pub category: ResourceCategory,
    /// Time spent waiting for the token
    pub waited: Duration,
}

/// Per-category token bucket rate limiter
pub struct RateLimiter {
    /// Identifier
    id: String,
    /// Configuration for categories without an override
    default_config: RateLimiterConfig,
    /// Per-category configuration overrides
    overrides: HashMap<ResourceCategory, RateLimiterConfig>,
    /// Per-category buckets, created on first use
    buckets: DashMap<ResourceCategory, Arc<Mutex<TokenBucket>>>,
    /// Longest time `acquire` may wait for a token
    max_wait: Duration,
    /// Whether rate limiting is enabled
    enabled: bool,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(id: impl Into<String>, config: RateLimiterConfig, max_wait: Duration) -> Self {
        Self {
            id: id.into(),
            default_config: config,
            overrides: HashMap::new(),
            buckets: DashMap::new(),
            max_wait,
            enabled: true,
        }
    }

    /// Create with default configuration (60 requests per minute, 5s wait ceiling)
    #[must_use]
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self::new(id, RateLimiterConfig::default(), Duration::from_secs(5))
    }

    /// Create a disabled rate limiter (always grants immediately)
    #[must_use]
    pub fn disabled(id: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::with_defaults(id)
        }
    }

    /// Use a dedicated configuration for one category
    #[must_use]
    pub fn with_category_config(
        mut self,
        category: ResourceCategory,
        config: RateLimiterConfig,
    ) -> Self {
        self.overrides.insert(category, config);
        self
    }

    /// Get the rate limiter ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if rate limiting is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait ceiling applied by `acquire`
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Configuration in effect for a category
    #[must_use]
    pub fn config_for(&self, category: ResourceCategory) -> &RateLimiterConfig {
        self.overrides.get(&category).unwrap_or(&self.default_config)
    }

    fn bucket(&self, category: ResourceCategory) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(category)
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config_for(category).clone(),
                )))
            })
            .clone()
    }

    /// Take a token without waiting
    ///
    /// # Errors
    /// Returns `GatewayError::RateLimitExceeded` if the bucket is empty
    pub fn try_acquire(&self, category: ResourceCategory) -> Result<RatePermit, GatewayError> {
        if !self.enabled {
            return Ok(RatePermit {
                category,
                waited: Duration::ZERO,
            });
        }

        let bucket = self.bucket(category);
        let outcome = bucket.lock().try_consume(Instant::now());
        match outcome {
            Ok(()) => Ok(RatePermit {
                category,
                waited: Duration::ZERO,
            }),
            Err(wait) => Err(GatewayError::rate_limited(category, wait)),
        }
    }

    /// Take a token, waiting up to the configured ceiling for one to refill
    ///
    /// The wait is abandoned as soon as `cancel` fires.
    ///
    /// # Errors
    /// Returns `GatewayError::RateLimitExceeded` if no token can be available
    /// within the ceiling, or `GatewayError::Cancelled` if cancelled while waiting
    pub async fn acquire(
        &self,
        category: ResourceCategory,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, GatewayError> {
        if !self.enabled {
            return Ok(RatePermit {
                category,
                waited: Duration::ZERO,
            });
        }

        let bucket = self.bucket(category);
        let start = Instant::now();
        let deadline = start + self.max_wait;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let now = Instant::now();
            let outcome = {
                let mut guard = bucket.lock();
                let outcome = guard.try_consume(now);
                if outcome.is_ok() {
                    debug!(
                        rate_limiter = %self.id,
                        category = %category,
                        tokens_remaining = guard.tokens,
                        "Rate limit permit granted"
                    );
                }
                outcome
            };

            let wait = match outcome {
                Ok(()) => {
                    return Ok(RatePermit {
                        category,
                        waited: now.saturating_duration_since(start),
                    })
                }
                Err(wait) => wait,
            };

            let Some(wait) = wait.filter(|w| {
                now.checked_add(*w)
                    .is_some_and(|ready_at| ready_at <= deadline)
            }) else {
                warn!(
                    rate_limiter = %self.id,
                    category = %category,
                    retry_after_ms = wait.map(|w| w.as_millis()),
                    max_wait_ms = self.max_wait.as_millis(),
                    "Rate limit exceeded"
                );
                return Err(GatewayError::rate_limited(category, wait));
            };

            debug!(
                rate_limiter = %self.id,
                category = %category,
                wait_ms = wait.as_millis(),
                "Waiting for rate limit token"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Get statistics for a category, refilled to the current time
    ///
    /// Does not create a bucket; an unused category reports a full one.
    #[must_use]
    pub fn stats(&self, category: ResourceCategory) -> BucketStats {
        let Some(bucket) = self.buckets.get(&category).map(|b| Arc::clone(b.value())) else {
            return TokenBucket::new(self.config_for(category).clone()).stats(category);
        };
        let mut guard = bucket.lock();
        guard.refill(Instant::now());
        guard.stats(category)
    }

    /// Statistics for the categories that have taken a token, ordered by category
    #[must_use]
    pub fn all_stats(&self) -> Vec<BucketStats> {
        let now = Instant::now();
        let buckets: Vec<_> = self
            .buckets
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut stats: Vec<BucketStats> = buckets
            .into_iter()
            .map(|(category, bucket)| {
                let mut guard = bucket.lock();
                guard.refill(now);
                guard.stats(category)
            })
            .collect();
        stats.sort_by_key(|s| s.category);
        stats
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("id", &self.id)
            .field("default_config", &self.default_config)
            .field("overrides", &self.overrides)
            .field("max_wait", &self.max_wait)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
