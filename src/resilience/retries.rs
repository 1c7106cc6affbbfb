//! Retry loop composed with a circuit breaker.
//!
//! # Responsibilities
//! - Ask the breaker for admission before every attempt
//! - Classify failures once, retry only the transient ones
//! - Sleep with jittered backoff between attempts
//! - Abort promptly when the caller's context is done
//!
//! # Attempt loop
//! ```text
//! attempt = 0
//! loop:
//!     ctx done?             → Cancelled / DeadlineExceeded
//!     breaker rejects?      → CircuitOpen (no delay, no call)
//!     call (races ctx)      → Ok → record success, return
//!     fatal                 → record failure, Permanent
//!     retryable, last try   → record failure, Exhausted
//!     retryable             → record failure, sleep(backoff) racing ctx, attempt += 1
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::classifier::{Disposition, ErrorClassifier};
use crate::resilience::error::{CallError, RpcError};
use crate::resilience::timeouts::{with_call_timeout, CallContext, DoneReason};

/// Retry behaviour for one dependency.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Width of the jitter band relative to the delay, in `[0, 1)`.
    pub jitter_fraction: f64,
    pub classifier: ErrorClassifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter_fraction: 0.2,
            classifier: ErrorClassifier::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// A breaker plus the retry policy that wraps every call through it.
#[derive(Debug, Clone)]
pub struct RetriableBreaker {
    breaker: Arc<CircuitBreaker>,
    policy: Arc<RetryPolicy>,
}

impl RetriableBreaker {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            policy: Arc::new(policy),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` with retries under the breaker.
    ///
    /// `op` receives the zero-indexed attempt number. Each attempt is bounded
    /// by the breaker's call timeout (when non-zero) and raced against `ctx`.
    pub async fn execute<T, F, Fut>(&self, ctx: &CallContext, mut op: F) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let name = self.breaker.name();
        let call_timeout = self.breaker.config().open_timeout;
        let mut attempt: u32 = 0;

        loop {
            if let Some(reason) = ctx.done_reason() {
                return Err(reason.into_error(attempt));
            }

            let permit = self
                .breaker
                .try_acquire()
                .map_err(|e| CallError::CircuitOpen {
                    dependency: e.dependency,
                })?;

            let outcome = tokio::select! {
                biased;
                reason = ctx.done() => {
                    match reason {
                        // A dependency that outlives the deadline is failing.
                        DoneReason::DeadlineExceeded => permit.failure(),
                        DoneReason::Cancelled => drop(permit),
                    }
                    tracing::debug!(
                        dependency = %name,
                        request_id = %ctx.request_id(),
                        attempt,
                        ?reason,
                        "Call aborted in flight"
                    );
                    return Err(reason.into_error(attempt + 1));
                }
                result = with_call_timeout(call_timeout, op(attempt)) => result,
            };

            let error = match outcome {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(error) => {
                    permit.failure();
                    error
                }
            };

            match self.policy.classifier.classify(error.code) {
                Disposition::Fatal => {
                    tracing::debug!(
                        dependency = %name,
                        request_id = %ctx.request_id(),
                        code = %error.code,
                        "Permanent failure, not retrying"
                    );
                    return Err(CallError::Permanent(error));
                }
                Disposition::Retryable if attempt >= self.policy.max_retries => {
                    tracing::warn!(
                        dependency = %name,
                        request_id = %ctx.request_id(),
                        attempts = attempt + 1,
                        code = %error.code,
                        "Retries exhausted"
                    );
                    return Err(CallError::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
                Disposition::Retryable => {
                    let delay = calculate_backoff(attempt, &self.policy);
                    metrics::record_retry(name);
                    tracing::info!(
                        dependency = %name,
                        request_id = %ctx.request_id(),
                        attempt,
                        delay = ?delay,
                        code = %error.code,
                        "Retrying call"
                    );

                    tokio::select! {
                        biased;
                        reason = ctx.done() => return Err(reason.into_error(attempt + 1)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::resilience::clock::ManualClock;
    use crate::resilience::error::RpcCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retriable(
        max_failures: u32,
        reset: Duration,
        max_retries: u32,
    ) -> (RetriableBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::with_clock(
            "engine",
            CircuitBreakerConfig {
                max_failures,
                open_timeout: Duration::ZERO,
                reset_timeout: reset,
            },
            clock.clone(),
        );
        let policy = RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_fraction: 0.0,
            ..RetryPolicy::default()
        };
        (RetriableBreaker::new(Arc::new(breaker), policy), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let (rb, _) = retriable(10, Duration::from_secs(5), 3);
        let calls = AtomicU32::new(0);

        let res: Result<(), _> = rb
            .execute(&CallContext::background(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::new(RpcCode::InvalidArgument, "bad symbol")) }
            })
            .await;

        assert!(matches!(res, Err(CallError::Permanent(ref e)) if e.code == RpcCode::InvalidArgument));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rb.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_success() {
        let (rb, _) = retriable(10, Duration::from_secs(5), 3);
        let calls = AtomicU32::new(0);

        let res = rb
            .execute(&CallContext::background(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(RpcError::unavailable("engine restarting"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(rb.breaker().failure_count(), 0);
        assert_eq!(rb.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_retries() {
        let (rb, _) = retriable(10, Duration::from_secs(5), 2);
        let calls = AtomicU32::new(0);

        let res: Result<(), _> = rb
            .execute(&CallContext::background(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::unavailable("down")) }
            })
            .await;

        match res {
            Err(CallError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.code, RpcCode::Unavailable);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_downstream() {
        let (rb, _) = retriable(1, Duration::from_secs(5), 0);
        rb.breaker().force_open();
        let calls = AtomicU32::new(0);

        let res: Result<(), _> = rb
            .execute(&CallContext::background(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(res, Err(CallError::CircuitOpen { ref dependency }) if dependency == "engine"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_promptly() {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::with_clock("engine", CircuitBreakerConfig::default(), clock);
        let rb = RetriableBreaker::new(
            Arc::new(breaker),
            RetryPolicy {
                max_retries: 5,
                initial_delay: Duration::from_secs(10),
                max_delay: Duration::from_secs(10),
                jitter_fraction: 0.0,
                ..RetryPolicy::default()
            },
        );
        let ctx = CallContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let res: Result<(), _> = rb
            .execute(&ctx, |_| async { Err(RpcError::unavailable("down")) })
            .await;

        assert!(matches!(res, Err(CallError::Cancelled { attempts: 1 })));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_call() {
        let (rb, _) = retriable(10, Duration::from_secs(5), 3);
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));

        let res: Result<(), _> = rb
            .execute(&ctx, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(res, Err(CallError::DeadlineExceeded { attempts: 1 })));
        assert_eq!(rb.breaker().failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_reopens_without_failure() {
        let (rb, clock) = retriable(1, Duration::from_secs(5), 0);
        rb.breaker().force_open();
        clock.advance(Duration::from_secs(5));
        let before = rb.breaker().failure_count();

        let ctx = CallContext::background();
        let canceller = ctx.clone();
        let res: Result<(), _> = rb
            .execute(&ctx, |_| {
                canceller.cancel();
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(res, Err(CallError::Cancelled { .. })));
        assert_eq!(rb.breaker().state(), CircuitState::Open);
        assert_eq!(rb.breaker().failure_count(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_keep_exact_count() {
        let (rb, _) = retriable(10, Duration::from_secs(5), 0);
        let rb = Arc::new(rb);
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let rb = rb.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    rb.execute(&CallContext::background(), |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::task::yield_now().await;
                            Err::<(), _>(RpcError::unavailable("down"))
                        }
                    })
                    .await
                })
            })
            .collect();

        let (mut exhausted, mut rejected) = (0u64, 0u64);
        for handle in handles {
            match handle.await.unwrap() {
                Err(CallError::Exhausted { attempts: 1, .. }) => exhausted += 1,
                Err(CallError::CircuitOpen { .. }) => rejected += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        let snapshot = rb.breaker().snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 10);
        assert_eq!(exhausted + rejected, 100);
        assert!(exhausted >= 10);
        // Every admitted call reached downstream; rejected ones never did.
        assert_eq!(u64::from(calls.load(Ordering::SeqCst)), exhausted);
        assert_eq!(snapshot.total_calls, exhausted);
        assert_eq!(snapshot.total_rejections, rejected);
        // Failures that settled after the breaker opened were stale and dropped.
        assert_eq!(snapshot.total_failures, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_then_admits_trial_after_reset() {
        let (rb, clock) = retriable(3, Duration::from_secs(5), 0);
        let calls = AtomicU32::new(0);
        let ctx = CallContext::background();

        for _ in 0..3 {
            let res: Result<(), _> = rb
                .execute(&ctx, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RpcError::unavailable("down")) }
                })
                .await;
            assert!(matches!(res, Err(CallError::Exhausted { .. })));
        }
        assert_eq!(rb.breaker().state(), CircuitState::Open);

        let fourth: Result<(), _> = rb
            .execute(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(fourth, Err(CallError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        clock.advance(Duration::from_secs(5));
        let trial = rb
            .execute(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("recovered") }
            })
            .await;
        assert_eq!(trial.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(rb.breaker().state(), CircuitState::Closed);
    }
}
