//! Deadlines and cancellation for downstream calls.
//!
//! # Responsibilities
//! - Carry the caller's deadline and cancellation token through the retry loop
//! - Derive bounded child contexts per dependency
//! - Bound a single attempt with the breaker's call timeout
//!
//! Every suspension point in the retry loop races [`CallContext::done`], so a
//! cancelled caller never waits out a backoff sleep or a slow engine.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::observability::tracing::TraceContext;
use crate::resilience::error::{CallError, RpcError};

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    Cancelled,
    DeadlineExceeded,
}

impl DoneReason {
    pub fn into_error(self, attempts: u32) -> CallError {
        match self {
            DoneReason::Cancelled => CallError::Cancelled { attempts },
            DoneReason::DeadlineExceeded => CallError::DeadlineExceeded { attempts },
        }
    }
}

/// Request-scoped context: deadline, cancellation, correlation ids.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    request_id: String,
    trace: TraceContext,
}

impl CallContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            request_id: request_id.into(),
            trace: TraceContext::generate(),
        }
    }

    /// A context with a generated request id and no deadline.
    pub fn background() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// Tie this context to an external token (connection or shutdown scope).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(earliest(self.deadline, Instant::now() + timeout));
        self
    }

    /// Child context: inherits cancellation and the parent deadline, bounded by `timeout`.
    ///
    /// Cancelling the child does not cancel the parent.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            deadline: Some(earliest(self.deadline, Instant::now() + timeout)),
            cancel: self.cancel.child_token(),
            request_id: self.request_id.clone(),
            trace: self.trace.clone(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Non-blocking check.
    pub fn done_reason(&self) -> Option<DoneReason> {
        if self.cancel.is_cancelled() {
            return Some(DoneReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DoneReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => DoneReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }
}

fn earliest(current: Option<Instant>, candidate: Instant) -> Instant {
    match current {
        Some(existing) if existing < candidate => existing,
        _ => candidate,
    }
}

/// Bound one attempt. A zero `limit` means unbounded.
pub async fn with_call_timeout<T, F>(limit: Duration, fut: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::deadline_exceeded(format!(
            "call exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
