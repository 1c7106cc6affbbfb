//! Circuit breaker for engine dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: a single trial call tests whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= max_failures (consecutive)
//! Open → Half-Open: reset_timeout elapsed since last failure, first caller becomes the trial
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (or is abandoned)
//! ```
//!
//! Every transition bumps `generation`. An admission remembers the generation
//! it was granted in and its outcome is dropped if the breaker has moved on,
//! so a slow call from an earlier epoch can never close or re-open the breaker.
//!
//! The lock covers bookkeeping only. The guarded call runs while no lock is held.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::metrics;
use crate::resilience::clock::{Clock, SystemClock};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value exported for the state.
    pub const fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Upper bound on a single admitted call. Zero disables the bound.
    pub open_timeout: Duration,
    /// Time spent open, measured from the last failure, before a trial is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout: Duration::ZERO,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for {dependency}")]
pub struct CircuitOpenError {
    pub dependency: String,
}

/// Error from [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    generation: u64,
}

/// Point-in-time view of a breaker, served by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub generation: u64,
    /// Milliseconds since the most recent failure, if any.
    pub last_failure_ms_ago: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Per-dependency circuit breaker. Share it behind an `Arc`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker backed by the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        metrics::record_breaker_state(&name, CircuitState::Closed);
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                generation: 0,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Admission check. Returns true when the caller may proceed.
    ///
    /// A caller admitted out of `Open` is the half-open trial; it must report
    /// back through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow_request(&self) -> bool {
        self.admit().is_ok()
    }

    /// Admission check returning a permit that reports its own outcome.
    ///
    /// Dropping the permit without reporting abandons the call: nothing is
    /// recorded, and an abandoned half-open trial re-opens the circuit so the
    /// next caller can run a fresh trial.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpenError> {
        let (generation, trial) = self.admit()?;
        Ok(CallPermit {
            breaker: self,
            generation,
            trial,
            settled: false,
        })
    }

    /// Record a success against the current generation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.on_success(&mut inner);
    }

    /// Record a failure against the current generation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.on_failure(&mut inner);
    }

    /// Run `f` under the breaker. Any `Err` from `f` counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Force the circuit open (operator action).
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure = Some(now);
        if inner.state != CircuitState::Open {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Force the circuit closed and clear the failure streak (operator action).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            generation: inner.generation,
            last_failure_ms_ago: inner
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    fn admit(&self) -> Result<(u64, bool), CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let admitted = match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |t| now.saturating_duration_since(t) >= self.config.reset_timeout);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Some(true)
                } else {
                    None
                }
            }
            // The trial is already in flight.
            CircuitState::HalfOpen => None,
        };

        match admitted {
            Some(trial) => {
                self.total_calls.fetch_add(1, Ordering::Relaxed);
                Ok((inner.generation, trial))
            }
            None => {
                drop(inner);
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                metrics::record_breaker_rejection(&self.name);
                Err(CircuitOpenError {
                    dependency: self.name.clone(),
                })
            }
        }
    }

    fn settle(&self, generation: u64, outcome: Option<bool>, trial: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            tracing::debug!(
                breaker = %self.name,
                permit_generation = generation,
                current_generation = inner.generation,
                "Discarding stale call outcome"
            );
            return;
        }

        match outcome {
            Some(true) => self.on_success(&mut inner),
            Some(false) => self.on_failure(&mut inner),
            None if trial && inner.state == CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Half-open trial abandoned, re-opening");
                self.transition(&mut inner, CircuitState::Open);
            }
            None => {}
        }
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            self.transition(inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.max_failures => {
                self.transition(inner, CircuitState::Open);
            }
            CircuitState::HalfOpen => self.transition(inner, CircuitState::Open),
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        metrics::record_breaker_state(&self.name, to);

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                %from,
                failures = inner.failure_count,
                generation = inner.generation,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                %from,
                to = %to,
                generation = inner.generation,
                "Circuit breaker transition"
            ),
        }
    }
}

/// An admitted call. Report exactly one outcome, or drop to abandon.
#[must_use = "dropping a permit abandons the call"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Some(true), self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, Some(false), self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, None, self.trial);
        }
    }
}
