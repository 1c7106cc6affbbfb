//! Response envelopes.
//!
//! Every failure renders the same JSON shape:
//! ```text
//! { "success": false, "error": "<kind>", "message": "<text>", "code": <int>,
//!   "timestamp": "<RFC3339>", "request_id": "<id>",
//!   "service": "<dependency>", "retryable": <bool> }
//! ```
//! Successes wrap the engine payload in `{ "success": true, "data": ... }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resilience::{ClientError, ErrorKind};

/// Service name for failures raised by the gateway itself.
pub const GATEWAY_SERVICE: &str = "gateway";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorKind,
    pub message: String,
    pub code: u16,
    pub timestamp: String,
    pub request_id: String,
    pub service: String,
    pub retryable: bool,
}

impl ErrorEnvelope {
    pub fn new(error: &ClientError, request_id: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.kind,
            message: error.message.clone(),
            code: error.status.as_u16(),
            timestamp: now_rfc3339(),
            request_id: request_id.into(),
            service: error.service.clone(),
            retryable: error.retryable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub data: Value,
    pub request_id: String,
    pub timestamp: String,
}

impl SuccessEnvelope {
    pub fn new(data: Value, request_id: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            request_id: request_id.into(),
            timestamp: now_rfc3339(),
        }
    }
}

/// A handler failure bound to its request id.
#[derive(Debug)]
pub struct ApiError {
    pub error: ClientError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: ClientError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }

    /// An extractor rejection, kept at its own status.
    pub fn rejected(
        status: StatusCode,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        let error = ClientError {
            kind: ErrorKind::Permanent,
            status,
            message: message.into(),
            retryable: false,
            service: GATEWAY_SERVICE.to_string(),
        };
        Self::new(error, request_id)
    }

    /// Input rejected before any dependency was contacted.
    pub fn invalid_argument(
        service: &str,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self::new(invalid_argument(service, message), request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope::new(&self.error, self.request_id);
        (self.error.status, Json(envelope)).into_response()
    }
}

/// Successful handler output.
#[derive(Debug)]
pub struct ApiSuccess(pub SuccessEnvelope);

impl ApiSuccess {
    pub fn new(data: Value, request_id: impl Into<String>) -> Self {
        Self(SuccessEnvelope::new(data, request_id))
    }
}

impl IntoResponse for ApiSuccess {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self.0)).into_response()
    }
}

pub fn invalid_argument(service: &str, message: impl Into<String>) -> ClientError {
    ClientError {
        kind: ErrorKind::Permanent,
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
        retryable: false,
        service: service.to_string(),
    }
}

pub fn not_found(path: &str) -> ClientError {
    ClientError {
        kind: ErrorKind::Permanent,
        status: StatusCode::NOT_FOUND,
        message: format!("No route for {path}"),
        retryable: false,
        service: GATEWAY_SERVICE.to_string(),
    }
}

pub fn method_not_allowed(method: &str, path: &str) -> ClientError {
    ClientError {
        kind: ErrorKind::Permanent,
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: format!("Method {method} is not allowed on {path}"),
        retryable: false,
        service: GATEWAY_SERVICE.to_string(),
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
