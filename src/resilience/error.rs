//! Error types shared by the resilience layer.
//!
//! # Taxonomy
//! ```text
//! RpcError   raw coded failure reported by the engine transport
//!     ↓ classified once by the retry loop
//! CallError  CircuitOpen | Cancelled | DeadlineExceeded | Permanent | Exhausted
//!     ↓ translated by ErrorClassifier
//! ClientError  kind + HTTP status + client-safe message
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes reported by the core engine (gRPC code space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// All codes, in gRPC numeric order.
    pub const ALL: [RpcCode; 16] = [
        RpcCode::Cancelled,
        RpcCode::Unknown,
        RpcCode::InvalidArgument,
        RpcCode::DeadlineExceeded,
        RpcCode::NotFound,
        RpcCode::AlreadyExists,
        RpcCode::PermissionDenied,
        RpcCode::ResourceExhausted,
        RpcCode::FailedPrecondition,
        RpcCode::Aborted,
        RpcCode::OutOfRange,
        RpcCode::Unimplemented,
        RpcCode::Internal,
        RpcCode::Unavailable,
        RpcCode::DataLoss,
        RpcCode::Unauthenticated,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            RpcCode::Cancelled => "CANCELLED",
            RpcCode::Unknown => "UNKNOWN",
            RpcCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::AlreadyExists => "ALREADY_EXISTS",
            RpcCode::PermissionDenied => "PERMISSION_DENIED",
            RpcCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcCode::FailedPrecondition => "FAILED_PRECONDITION",
            RpcCode::Aborted => "ABORTED",
            RpcCode::OutOfRange => "OUT_OF_RANGE",
            RpcCode::Unimplemented => "UNIMPLEMENTED",
            RpcCode::Internal => "INTERNAL",
            RpcCode::Unavailable => "UNAVAILABLE",
            RpcCode::DataLoss => "DATA_LOSS",
            RpcCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown rpc code: {0}")]
pub struct ParseRpcCodeError(pub String);

impl FromStr for RpcCode {
    type Err = ParseRpcCodeError;

    /// Accepts `UNAVAILABLE`, `unavailable`, `Unavailable` and `resource-exhausted`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        RpcCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str().replace('_', "") == normalized)
            .ok_or_else(|| ParseRpcCodeError(s.to_string()))
    }
}

/// A coded failure returned by a single downstream invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: RpcCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(RpcCode::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Internal, message)
    }
}

/// Outcome of a resilient call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The breaker rejected the call without contacting the dependency.
    #[error("circuit open for {dependency}")]
    CircuitOpen { dependency: String },

    /// The caller gave up (client disconnected or shutdown).
    #[error("call cancelled by caller after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// The caller's deadline passed before a result was obtained.
    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    /// A fatal classification; never retried.
    #[error("permanent failure: {0}")]
    Permanent(RpcError),

    /// Transient failures persisted through every allowed retry.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: RpcError },
}

impl CallError {
    /// Number of downstream attempts made before the error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::CircuitOpen { .. } => 0,
            CallError::Permanent(_) => 1,
            CallError::Cancelled { attempts }
            | CallError::DeadlineExceeded { attempts }
            | CallError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }
}

/// Client-facing taxonomy rendered into the `error` field of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    CircuitOpen,
    Cancellation,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
