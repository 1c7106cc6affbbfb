//! Route handlers.
//!
//! HTTP and WebSocket requests both reduce to an [`Action`], validated before
//! any dependency is contacted, then dispatched to the matching
//! [`DependencyClient`](crate::engine::DependencyClient).

use axum::{
    extract::{OriginalUri, Query, State},
    http::Method,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::EngineClients;
use crate::http::request::{validate_limit, validate_symbol, PathParam, RequestContext};
use crate::http::response::{
    invalid_argument, method_not_allowed as not_allowed, not_found, ApiError, ApiSuccess,
};
use crate::http::server::AppState;
use crate::resilience::{CallContext, CircuitState, ClientError};

/// A validated request for one engine dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MarketData { symbol: String },
    News { symbol: String, limit: u32 },
    Buffers,
    Stats,
}

impl Action {
    /// Dependency serving this action.
    pub fn service(&self) -> &'static str {
        match self {
            Action::MarketData { .. } => "market_data",
            Action::News { .. } => "news",
            Action::Buffers => "buffers",
            Action::Stats => "stats",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Action::MarketData { symbol } => json!({ "symbol": symbol }),
            Action::News { symbol, limit } => json!({ "symbol": symbol, "limit": limit }),
            Action::Buffers | Action::Stats => json!({}),
        }
    }

    /// Build from a WebSocket `{ "action": ..., "params": ... }` message.
    pub fn from_message(action: &str, params: &Value) -> Result<Self, ClientError> {
        match action {
            "market_data" => Ok(Action::MarketData {
                symbol: symbol_param("market_data", params)?,
            }),
            "news" => {
                let symbol = symbol_param("news", params)?;
                let limit = match params.get("limit") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(
                        v.as_u64()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| {
                                invalid_argument("news", "limit must be a positive integer")
                            })?,
                    ),
                };
                let limit = validate_limit(limit).map_err(|m| invalid_argument("news", m))?;
                Ok(Action::News { symbol, limit })
            }
            "buffers" => Ok(Action::Buffers),
            "stats" => Ok(Action::Stats),
            other => Err(invalid_argument(
                crate::http::response::GATEWAY_SERVICE,
                format!("unknown action '{other}' (expected market_data, news, buffers or stats)"),
            )),
        }
    }
}

fn symbol_param(service: &str, params: &Value) -> Result<String, ClientError> {
    let raw = params
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_argument(service, "symbol is required"))?;
    validate_symbol(raw).map_err(|m| invalid_argument(service, m))
}

/// Route a validated action to its dependency.
pub async fn dispatch(
    clients: &EngineClients,
    ctx: &CallContext,
    action: &Action,
) -> Result<Value, ClientError> {
    let client = match action {
        Action::MarketData { .. } => &clients.market_data,
        Action::News { .. } => &clients.news,
        Action::Buffers => &clients.buffers,
        Action::Stats => &clients.stats,
    };
    client.call(ctx, action.payload()).await
}

async fn run(state: &AppState, ctx: CallContext, action: Action) -> Result<ApiSuccess, ApiError> {
    match dispatch(&state.clients, &ctx, &action).await {
        Ok(data) => Ok(ApiSuccess::new(data, ctx.request_id())),
        Err(error) => Err(ApiError::new(error, ctx.request_id())),
    }
}

pub async fn market_data(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    PathParam(symbol): PathParam,
) -> Result<ApiSuccess, ApiError> {
    let symbol = validate_symbol(&symbol)
        .map_err(|m| ApiError::invalid_argument("market_data", m, ctx.request_id()))?;
    run(&state, ctx, Action::MarketData { symbol }).await
}

#[derive(Debug, Deserialize)]
pub struct NewsQuery {
    pub limit: Option<String>,
}

pub async fn news(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    PathParam(symbol): PathParam,
    Query(query): Query<NewsQuery>,
) -> Result<ApiSuccess, ApiError> {
    let invalid = |m: String| ApiError::invalid_argument("news", m, ctx.request_id());

    let symbol = validate_symbol(&symbol).map_err(invalid)?;
    let limit = match query.limit.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| invalid(format!("limit '{raw}' is not a positive integer")))?,
        ),
    };
    let limit = validate_limit(limit).map_err(invalid)?;

    run(&state, ctx, Action::News { symbol, limit }).await
}

pub async fn buffers(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
) -> Result<ApiSuccess, ApiError> {
    run(&state, ctx, Action::Buffers).await
}

pub async fn stats(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
) -> Result<ApiSuccess, ApiError> {
    run(&state, ctx, Action::Stats).await
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub dependencies: Vec<DependencyHealth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub state: CircuitState,
}

/// Liveness plus breaker overview. Always 200; `degraded` when a breaker is not closed.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let dependencies: Vec<DependencyHealth> = state
        .clients
        .all()
        .iter()
        .map(|c| DependencyHealth {
            name: c.name().to_string(),
            state: c.breaker().state(),
        })
        .collect();

    let degraded = dependencies.iter().any(|d| d.state != CircuitState::Closed);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        dependencies,
    })
}

pub async fn fallback(
    RequestContext(ctx): RequestContext,
    OriginalUri(uri): OriginalUri,
) -> ApiError {
    ApiError::new(not_found(uri.path()), ctx.request_id())
}

pub async fn method_not_allowed(
    RequestContext(ctx): RequestContext,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> ApiError {
    ApiError::new(not_allowed(method.as_str(), uri.path()), ctx.request_id())
}
