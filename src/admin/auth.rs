use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::request_id;
use crate::http::response::{ApiError, GATEWAY_SERVICE};
use crate::http::server::AppState;
use crate::resilience::{ClientError, ErrorKind};

/// Bearer-token check against `admin.api_key`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.admin.api_key.as_str();

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if !expected.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            let error = ClientError {
                kind: ErrorKind::Permanent,
                status: StatusCode::UNAUTHORIZED,
                message: "A valid admin bearer token is required".to_string(),
                retryable: false,
                service: GATEWAY_SERVICE.to_string(),
            };
            ApiError::new(error, request_id(request.headers())).into_response()
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
