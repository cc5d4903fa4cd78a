//! Retry with exponential backoff and jitter.
//!
//! The controller drives an [`UpstreamClient`] through up to `max_attempts`
//! attempts. Transient failures and timeouts are retried after
//! `base_delay * 2^(attempt-1)` plus up to `jitter_ratio` of that delay; a
//! server-supplied `Retry-After` replaces the computed backoff. Permanent
//! failures are returned at once. Every wait, and the upstream call itself,
//! is abandoned when the caller's cancellation token fires.

use crate::sleeper::{Sleeper, TokioSleeper};
use blox_core::{GatewayError, RequestDescriptor, UpstreamClient, UpstreamResult};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for the computed backoff (before jitter)
    pub max_delay: Duration,
    /// Jitter added on top of a delay, as a fraction of it
    pub jitter_ratio: f64,
    /// Upper bound applied to server-supplied `Retry-After` values
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

/// Result of a retried call together with the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Final payload or typed error
    pub result: Result<Value, GatewayError>,
    /// Upstream attempts made
    pub attempts: u32,
}

/// The last retryable failure seen, kept for the exhausted-retries error
enum LastFailure {
    Transient { message: String, status: u16 },
    Unreachable { message: String },
    Timeout { after: Duration },
}

impl LastFailure {
    fn into_error(self, attempts: u32) -> GatewayError {
        match self {
            Self::Transient { message, status } => {
                GatewayError::upstream_transient(message, Some(status), attempts, false)
            }
            Self::Unreachable { message } => GatewayError::upstream_unreachable(message, attempts),
            Self::Timeout { after } => GatewayError::upstream_transient(
                format!("Upstream did not respond within {}ms", after.as_millis()),
                None,
                attempts,
                true,
            ),
        }
    }
}

/// Drives upstream attempts with backoff between them
#[derive(Clone)]
pub struct RetryController {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryController {
    /// Create a controller sleeping on the tokio timer
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Replace the sleeper used between attempts
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retrying after the given failed attempt (1-based), without jitter
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.config
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.config.max_delay)
    }

    /// Delay before the next attempt, honouring a server-supplied `Retry-After`
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = match retry_after {
            Some(requested) => requested.min(self.config.max_retry_after),
            None => self.backoff_delay(attempt),
        };
        base + self.jitter(base)
    }

    /// Random extra delay in `[0, jitter_ratio * delay)`
    fn jitter(&self, delay: Duration) -> Duration {
        let ratio = self.config.jitter_ratio;
        if ratio.is_nan() || ratio <= 0.0 || delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = rand::thread_rng().gen_range(0.0..ratio);
        delay.mul_f64(factor)
    }

    /// Run the descriptor against the client, retrying transient failures
    pub async fn run(
        &self,
        client: &dyn UpstreamClient,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(GatewayError::Cancelled),
                    attempts: attempt - 1,
                };
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(GatewayError::Cancelled),
                        attempts: attempt,
                    };
                }
                result = client.call(descriptor) => result,
            };

            let (failure, retry_after) = match result {
                UpstreamResult::Success { payload, .. } => {
                    debug!(
                        upstream = %client.id(),
                        request = %descriptor,
                        attempt,
                        "Upstream call succeeded"
                    );
                    return RetryOutcome {
                        result: Ok(payload),
                        attempts: attempt,
                    };
                }
                UpstreamResult::PermanentFailure { message, status } => {
                    debug!(
                        upstream = %client.id(),
                        request = %descriptor,
                        status,
                        "Upstream rejected request, not retrying"
                    );
                    return RetryOutcome {
                        result: Err(GatewayError::upstream_permanent(message, status)),
                        attempts: attempt,
                    };
                }
                UpstreamResult::TransientFailure {
                    message,
                    status: Some(status),
                    retry_after,
                } => (LastFailure::Transient { message, status }, retry_after),
                UpstreamResult::TransientFailure {
                    message,
                    status: None,
                    retry_after,
                } => (LastFailure::Unreachable { message }, retry_after),
                UpstreamResult::Timeout { after } => (LastFailure::Timeout { after }, None),
            };

            if attempt >= max_attempts {
                let err = failure.into_error(attempt);
                error!(
                    upstream = %client.id(),
                    request = %descriptor,
                    attempts = attempt,
                    error = %err,
                    "Upstream retries exhausted"
                );
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let delay = self.delay_for(attempt, retry_after);
            warn!(
                upstream = %client.id(),
                request = %descriptor,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis(),
                retry_after_ms = retry_after.map(|d| d.as_millis()),
                "Retrying upstream call"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(GatewayError::Cancelled),
                        attempts: attempt,
                    };
                }
                () = self.sleeper.sleep(delay) => {}
            }
        }
    }

    /// Run and return only the payload or typed error
    ///
    /// # Errors
    /// Returns the typed error of the final attempt, or `GatewayError::Cancelled`
    pub async fn execute(
        &self,
        client: &dyn UpstreamClient,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        self.run(client, descriptor, cancel).await.result
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::TrackingSleeper;
    use async_trait::async_trait;
    use blox_core::ResourceCategory;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results, then keeps returning the last one
    struct ScriptedClient {
        script: Mutex<VecDeque<UpstreamResult>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(script: Vec<UpstreamResult>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedClient {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn call(&self, _descriptor: &RequestDescriptor) -> UpstreamResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::builder(ResourceCategory::Users, "/v1/users/{userId}")
            .path_param("userId", 1)
            .build()
            .unwrap()
    }

    fn controller(sleeper: &TrackingSleeper) -> RetryController {
        RetryController::with_defaults().with_sleeper(Arc::new(sleeper.clone()))
    }

    #[test]
    fn test_backoff_doubles() {
        let controller = RetryController::with_defaults();
        assert_eq!(controller.backoff_delay(1), Duration::from_millis(300));
        assert_eq!(controller.backoff_delay(2), Duration::from_millis(600));
        assert_eq!(controller.backoff_delay(3), Duration::from_millis(1200));
        assert_eq!(controller.backoff_delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounds() {
        let controller = RetryController::with_defaults();
        for _ in 0..200 {
            let delay = controller.delay_for(1, None);
            assert!(delay >= Duration::from_millis(300));
            assert!(delay < Duration::from_millis(360));
        }
    }

    #[test]
    fn test_retry_after_is_capped() {
        let controller = RetryController::with_defaults();
        let delay = controller.delay_for(1, Some(Duration::from_secs(600)));
        assert!(delay >= Duration::from_secs(30));
        assert!(delay < Duration::from_secs(36));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![
            UpstreamResult::transient("Service Unavailable", 503),
            UpstreamResult::transient("Service Unavailable", 503),
            UpstreamResult::success(json!({"id": 1})),
        ]);

        let outcome = controller(&sleeper)
            .run(&client, &descriptor(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.result, Ok(json!({"id": 1})));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(client.calls(), 3);

        let sleeps = sleeper.calls();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[1] > sleeps[0]);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![UpstreamResult::permanent("User not found", 404)]);

        let result = controller(&sleeper)
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await;

        assert_eq!(
            result,
            Err(GatewayError::upstream_permanent("User not found", 404))
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_transient_error() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![UpstreamResult::transient("Bad Gateway", 502)]);

        let result = controller(&sleeper)
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await;

        match result {
            Err(GatewayError::UpstreamTransient {
                status, attempts, timed_out, ..
            }) => {
                assert_eq!(status, Some(502));
                assert_eq!(attempts, 3);
                assert!(!timed_out);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(client.calls(), 3);
        assert_eq!(sleeper.call_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_timeouts_report_timeout() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![UpstreamResult::Timeout {
            after: Duration::from_secs(10),
        }]);

        let err = controller(&sleeper)
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::UpstreamTransient {
                timed_out: true,
                status: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_reported_distinctly() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![UpstreamResult::unreachable("connection refused")]);

        let err = controller(&sleeper)
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::UpstreamUnreachable { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![
            UpstreamResult::transient("Too Many Requests", 429)
                .with_retry_after(Duration::from_secs(2)),
            UpstreamResult::success(json!([])),
        ]);

        let result = controller(&sleeper)
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        let sleeps = sleeper.calls();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0] >= Duration::from_secs(2));
        assert!(sleeps[0] < Duration::from_millis(2400));
    }

    #[tokio::test]
    async fn test_single_attempt_config() {
        let sleeper = TrackingSleeper::new();
        let client = ScriptedClient::new(vec![UpstreamResult::transient("busy", 503)]);
        let controller = RetryController::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
        .with_sleeper(Arc::new(sleeper.clone()));

        let result = controller
            .execute(&client, &descriptor(), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(client.calls(), 1);
        assert_eq!(sleeper.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let client = Arc::new(ScriptedClient::new(vec![UpstreamResult::transient(
            "busy", 503,
        )]));
        let controller = RetryController::new(RetryConfig {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..RetryConfig::default()
        });
        let cancel = CancellationToken::new();

        let task = {
            let client = Arc::clone(&client);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                controller
                    .execute(client.as_ref(), &descriptor(), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap(), Err(GatewayError::Cancelled));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let client = ScriptedClient::new(vec![UpstreamResult::success(json!({}))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = RetryController::with_defaults()
            .run(&client, &descriptor(), &cancel)
            .await;

        assert_eq!(outcome.result, Err(GatewayError::Cancelled));
        assert_eq!(outcome.attempts, 0);
        assert_eq!(client.calls(), 0);
    }
}
