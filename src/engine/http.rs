//! JSON-over-HTTP engine transport.
//!
//! Request: `POST {endpoint}/rpc/{Method}` with a JSON body and the metadata
//! as headers. A 2xx answer carries the result as JSON. Anything else either
//! carries `{"code": "...", "message": "..."}` or is mapped from its status.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Deserialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::engine::{EngineMethod, EngineTransport, RpcRequest};
use crate::resilience::{RpcCode, RpcError};

#[derive(Debug, Clone)]
pub struct HttpEngineTransport {
    client: Client<HttpConnector, Body>,
    endpoint: String,
    max_response_bytes: usize,
}

#[derive(Deserialize)]
struct EngineErrorBody {
    code: RpcCode,
    #[serde(default)]
    message: String,
}

impl HttpEngineTransport {
    pub fn new(config: &EngineConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout()));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_response_bytes: config.max_response_bytes,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(
        &self,
        method: EngineMethod,
        request: RpcRequest,
    ) -> Result<Request<Body>, RpcError> {
        let body = serde_json::to_vec(&request.payload)
            .map_err(|e| RpcError::internal(format!("failed to encode request: {e}")))?;

        let mut req = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/rpc/{}", self.endpoint, method.as_str()))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| RpcError::internal(format!("failed to build request: {e}")))?;

        req.headers_mut().extend(request.metadata);
        Ok(req)
    }
}

#[async_trait]
impl EngineTransport for HttpEngineTransport {
    async fn invoke(&self, method: EngineMethod, request: RpcRequest) -> Result<Value, RpcError> {
        let req = self.build_request(method, request)?;

        let response = self.client.request(req).await.map_err(|e| {
            tracing::debug!(method = %method, error = %e, "Engine transport error");
            if e.is_connect() {
                RpcError::unavailable("engine unreachable")
            } else {
                RpcError::unavailable("engine connection failed")
            }
        })?;

        let status = response.status();
        let bytes = Limited::new(response.into_body(), self.max_response_bytes)
            .collect()
            .await
            .map_err(|e| {
                tracing::debug!(method = %method, error = %e, "Failed reading engine response");
                // Oversized answers are fatal.
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    RpcError::internal(format!(
                        "engine response exceeds {} bytes",
                        self.max_response_bytes
                    ))
                } else {
                    RpcError::unavailable("engine response interrupted")
                }
            })?
            .to_bytes();

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes)
                .map_err(|e| RpcError::internal(format!("malformed engine response: {e}")));
        }

        match serde_json::from_slice::<EngineErrorBody>(&bytes) {
            Ok(body) => Err(RpcError::new(body.code, body.message)),
            Err(_) => Err(RpcError::new(
                code_for_status(status),
                format!("engine returned {status}"),
            )),
        }
    }
}

/// Engine code implied by a bare HTTP status.
pub fn code_for_status(status: StatusCode) -> RpcCode {
    match status {
        StatusCode::BAD_REQUEST => RpcCode::InvalidArgument,
        StatusCode::UNAUTHORIZED => RpcCode::Unauthenticated,
        StatusCode::FORBIDDEN => RpcCode::PermissionDenied,
        StatusCode::NOT_FOUND => RpcCode::NotFound,
        StatusCode::CONFLICT => RpcCode::Aborted,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RpcCode::DeadlineExceeded,
        StatusCode::TOO_MANY_REQUESTS => RpcCode::ResourceExhausted,
        StatusCode::NOT_IMPLEMENTED => RpcCode::Unimplemented,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => RpcCode::Unavailable,
        s if s.is_server_error() => RpcCode::Internal,
        _ => RpcCode::Unknown,
    }
}
