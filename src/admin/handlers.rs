use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::request::{request_id, PathParam};
use crate::http::response::{ApiError, GATEWAY_SERVICE};
use crate::http::server::AppState;
use crate::resilience::{BreakerSnapshot, ClientError, ErrorKind};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub engine_endpoint: String,
    pub open_breakers: Vec<String>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let open_breakers = state
        .clients
        .snapshots()
        .into_iter()
        .filter(|s| s.state != crate::resilience::CircuitState::Closed)
        .map(|s| s.name)
        .collect::<Vec<_>>();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if open_breakers.is_empty() { "operational" } else { "degraded" }.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        engine_endpoint: state.config.engine.endpoint.clone(),
        open_breakers,
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.clients.snapshots())
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    headers: HeaderMap,
    PathParam(name): PathParam,
) -> Response {
    match state.clients.get(&name) {
        Some(client) => {
            client.breaker().reset();
            tracing::info!(breaker = %name, "Breaker reset by operator");
            Json(client.breaker().snapshot()).into_response()
        }
        None => {
            let error = ClientError {
                kind: ErrorKind::Permanent,
                status: StatusCode::NOT_FOUND,
                message: format!("No breaker named '{name}'"),
                retryable: false,
                service: GATEWAY_SERVICE.to_string(),
            };
            ApiError::new(error, request_id(&headers)).into_response()
        }
    }
}
