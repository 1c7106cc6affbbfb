//! Request handling.
//!
//! # Responsibilities
//! - Request ID generated as early as possible (tower-http layer in server.rs)
//! - Trace context parsed from `traceparent` or started fresh
//! - A [`CallContext`] per request, cancelled by server shutdown
//! - Path and query validation shared by HTTP and WebSocket handlers

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
    http::HeaderMap,
};

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::tracing::{TraceContext, TRACEPARENT};
use crate::resilience::CallContext;

pub const X_REQUEST_ID: &str = "x-request-id";

pub const MAX_SYMBOL_LEN: usize = 12;
pub const DEFAULT_NEWS_LIMIT: u32 = 20;
pub const MAX_NEWS_LIMIT: u32 = 100;

/// Request id from the header set by the request-id layer.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Per-request call context, extracted from headers.
#[derive(Debug, Clone)]
pub struct RequestContext(pub CallContext);

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let trace = TraceContext::from_header(
            parts.headers.get(TRACEPARENT).and_then(|v| v.to_str().ok()),
        );
        let ctx = CallContext::new(request_id(&parts.headers))
            .with_trace(trace)
            .with_cancellation(state.shutdown.child_token());
        Ok(RequestContext(ctx))
    }
}

/// A single path segment. Malformed segments (bad percent-encoding, invalid
/// UTF-8) are answered with an error envelope.
#[derive(Debug, Clone)]
pub struct PathParam(pub String);

impl<S> FromRequestParts<S> for PathParam
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<String>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::rejected(
                rejection.status(),
                rejection.body_text(),
                request_id(&parts.headers),
            )),
        }
    }
}

/// Normalize a ticker symbol: 1 to 12 of `A-Z 0-9 . -`, upper-cased.
pub fn validate_symbol(raw: &str) -> Result<String, String> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err("symbol must not be empty".to_string());
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(format!("symbol must be at most {MAX_SYMBOL_LEN} characters"));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(format!("symbol '{raw}' contains invalid characters"));
    }
    Ok(symbol)
}

/// News page size: defaults when absent, bounded to `1..=100`.
pub fn validate_limit(limit: Option<u32>) -> Result<u32, String> {
    match limit {
        None => Ok(DEFAULT_NEWS_LIMIT),
        Some(n) if (1..=MAX_NEWS_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(format!("limit must be between 1 and {MAX_NEWS_LIMIT}, got {n}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_symbol_validation() {
        assert_eq!(validate_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(validate_symbol("BRK.B").unwrap(), "BRK.B");
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("DROP TABLE").is_err());
        assert!(validate_symbol("ABCDEFGHIJKLM").is_err());
    }

    #[test]
    fn test_limit_validation() {
        assert_eq!(validate_limit(None).unwrap(), DEFAULT_NEWS_LIMIT);
        assert_eq!(validate_limit(Some(5)).unwrap(), 5);
        assert!(validate_limit(Some(0)).is_err());
        assert!(validate_limit(Some(101)).is_err());
    }

    #[test]
    fn test_request_id_falls_back_to_uuid() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers).len(), 36);
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), "abc-123");
    }
}
