//! Error classification and client-facing translation.
//!
//! | Retryable (transient) | Fatal (permanent)    |
//! |-----------------------|----------------------|
//! | UNAVAILABLE           | INVALID_ARGUMENT     |
//! | DEADLINE_EXCEEDED     | NOT_FOUND            |
//! | RESOURCE_EXHAUSTED    | PERMISSION_DENIED    |
//! |                       | UNAUTHENTICATED      |
//! |                       | FAILED_PRECONDITION  |
//! |                       | anything else        |
//!
//! Unknown codes are fatal: the gateway never retries a failure mode it
//! cannot name.

use std::collections::HashSet;

use axum::http::StatusCode;

use crate::resilience::error::{CallError, ErrorKind, RpcCode, RpcError};

/// Retry decision for a single failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Fatal,
}

/// Client-safe rendering of a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    pub retryable: bool,
    pub service: String,
}

/// Decides which codes are retried and how failures look to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    retryable: HashSet<RpcCode>,
}

impl ErrorClassifier {
    pub const DEFAULT_RETRYABLE: [RpcCode; 3] = [
        RpcCode::Unavailable,
        RpcCode::DeadlineExceeded,
        RpcCode::ResourceExhausted,
    ];

    pub fn new(retryable: impl IntoIterator<Item = RpcCode>) -> Self {
        Self {
            retryable: retryable.into_iter().collect(),
        }
    }

    pub fn classify(&self, code: RpcCode) -> Disposition {
        if self.retryable.contains(&code) {
            Disposition::Retryable
        } else {
            Disposition::Fatal
        }
    }

    pub fn is_retryable(&self, code: RpcCode) -> bool {
        self.classify(code) == Disposition::Retryable
    }

    /// Retryable codes, sorted for stable display.
    pub fn retryable_codes(&self) -> Vec<RpcCode> {
        let mut codes: Vec<RpcCode> = self.retryable.iter().copied().collect();
        codes.sort_by_key(|c| c.as_str());
        codes
    }

    /// Translate a call failure for the client.
    pub fn translate(&self, error: &CallError, service: &str) -> ClientError {
        let (kind, status, message, retryable) = match error {
            CallError::CircuitOpen { .. } => (
                ErrorKind::CircuitOpen,
                StatusCode::SERVICE_UNAVAILABLE,
                format!("The {service} service is temporarily unavailable; retry later"),
                true,
            ),
            CallError::Cancelled { .. } => (
                ErrorKind::Cancellation,
                client_closed_request(),
                format!("The request to the {service} service was cancelled"),
                true,
            ),
            CallError::DeadlineExceeded { .. } => (
                ErrorKind::Cancellation,
                StatusCode::REQUEST_TIMEOUT,
                format!("The {service} service did not respond in time"),
                true,
            ),
            CallError::Permanent(rpc) => (
                ErrorKind::Permanent,
                http_status(rpc.code),
                client_message(rpc, service),
                false,
            ),
            CallError::Exhausted { last, .. } => (
                ErrorKind::Transient,
                http_status(last.code),
                client_message(last, service),
                true,
            ),
        };

        ClientError {
            kind,
            status,
            message,
            retryable,
            service: service.to_string(),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRYABLE)
    }
}

/// HTTP status for an engine code.
pub fn http_status(code: RpcCode) -> StatusCode {
    match code {
        RpcCode::InvalidArgument | RpcCode::FailedPrecondition | RpcCode::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
        RpcCode::NotFound => StatusCode::NOT_FOUND,
        RpcCode::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        RpcCode::AlreadyExists | RpcCode::Aborted => StatusCode::CONFLICT,
        RpcCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        RpcCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        RpcCode::Cancelled => client_closed_request(),
        RpcCode::Internal | RpcCode::Unknown | RpcCode::DataLoss => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// 499 Client Closed Request
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Templated message. Engine text is echoed only for caller-caused codes.
fn client_message(error: &RpcError, service: &str) -> String {
    match error.code {
        RpcCode::InvalidArgument
        | RpcCode::NotFound
        | RpcCode::FailedPrecondition
        | RpcCode::OutOfRange
        | RpcCode::AlreadyExists => {
            if error.message.is_empty() {
                format!("The {service} service rejected the request")
            } else {
                error.message.clone()
            }
        }
        RpcCode::Unauthenticated => "Authentication is required".to_string(),
        RpcCode::PermissionDenied => "Access to this resource is denied".to_string(),
        RpcCode::DeadlineExceeded => format!("The {service} service did not respond in time"),
        RpcCode::ResourceExhausted => format!("The {service} service is rate limited; slow down"),
        RpcCode::Unavailable => format!("The {service} service is unavailable"),
        RpcCode::Unimplemented => format!("The {service} operation is not supported"),
        RpcCode::Aborted => format!("The {service} operation was aborted"),
        RpcCode::Cancelled => format!("The {service} operation was cancelled"),
        RpcCode::Internal | RpcCode::Unknown | RpcCode::DataLoss => {
            format!("The {service} service encountered an internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        let c = ErrorClassifier::default();
        for code in [RpcCode::Unavailable, RpcCode::DeadlineExceeded, RpcCode::ResourceExhausted] {
            assert_eq!(c.classify(code), Disposition::Retryable, "{code}");
        }
        for code in [
            RpcCode::InvalidArgument,
            RpcCode::NotFound,
            RpcCode::PermissionDenied,
            RpcCode::Unauthenticated,
            RpcCode::FailedPrecondition,
            RpcCode::Unknown,
            RpcCode::Internal,
        ] {
            assert_eq!(c.classify(code), Disposition::Fatal, "{code}");
        }
    }

    #[test]
    fn test_custom_retryable_set() {
        let c = ErrorClassifier::new([RpcCode::Aborted]);
        assert!(c.is_retryable(RpcCode::Aborted));
        assert!(!c.is_retryable(RpcCode::Unavailable));
        assert_eq!(c.retryable_codes(), vec![RpcCode::Aborted]);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RpcCode::InvalidArgument, 400),
            (RpcCode::NotFound, 404),
            (RpcCode::PermissionDenied, 403),
            (RpcCode::Unauthenticated, 401),
            (RpcCode::DeadlineExceeded, 408),
            (RpcCode::ResourceExhausted, 429),
            (RpcCode::Unavailable, 503),
            (RpcCode::Internal, 500),
            (RpcCode::Unknown, 500),
        ];
        for (code, status) in cases {
            assert_eq!(http_status(code).as_u16(), status, "{code}");
        }
    }

    #[test]
    fn test_translate_circuit_open() {
        let c = ErrorClassifier::default();
        let err = c.translate(&CallError::CircuitOpen { dependency: "news".into() }, "news");
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.retryable);
        assert_eq!(err.service, "news");
    }

    #[test]
    fn test_translate_hides_internal_detail() {
        let c = ErrorClassifier::default();
        let err = c.translate(
            &CallError::Permanent(RpcError::internal("segfault at 0xdeadbeef")),
            "stats",
        );
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("deadbeef"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_translate_echoes_validation_message() {
        let c = ErrorClassifier::default();
        let err = c.translate(
            &CallError::Permanent(RpcError::new(RpcCode::NotFound, "unknown symbol ZZZ")),
            "market_data",
        );
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "unknown symbol ZZZ");
    }

    #[test]
    fn test_translate_exhausted_and_cancellation() {
        let c = ErrorClassifier::default();
        let exhausted = c.translate(
            &CallError::Exhausted { attempts: 3, last: RpcError::unavailable("conn refused") },
            "news",
        );
        assert_eq!(exhausted.kind, ErrorKind::Transient);
        assert_eq!(exhausted.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!exhausted.message.contains("conn refused"));

        let timeout = c.translate(&CallError::DeadlineExceeded { attempts: 2 }, "news");
        assert_eq!(timeout.kind, ErrorKind::Cancellation);
        assert_eq!(timeout.status, StatusCode::REQUEST_TIMEOUT);

        let cancelled = c.translate(&CallError::Cancelled { attempts: 1 }, "news");
        assert_eq!(cancelled.kind, ErrorKind::Cancellation);
        assert_eq!(cancelled.status.as_u16(), 499);
    }
}
