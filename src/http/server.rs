//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, body limit, route metrics)
//! - Mount the admin API when enabled
//! - Serve until the shutdown token fires, then drain

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::Request as HttpRequest,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::engine::EngineClients;
use crate::http::handlers;
use crate::http::request::X_REQUEST_ID;
use crate::http::websocket;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<EngineClients>,
    pub config: Arc<GatewayConfig>,
    /// Cancelled on process shutdown; every request context derives from it.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, clients: EngineClients, shutdown: CancellationToken) -> Self {
        Self {
            clients: Arc::new(clients),
            config: Arc::new(config),
            shutdown,
            started_at: Instant::now(),
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    shutdown: CancellationToken,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let shutdown = state.shutdown.clone();
        let router = Self::build_router(state);
        Self { router, shutdown }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        let max_body_bytes = state.config.listener.max_body_bytes;

        let mut router = Router::new()
            .route("/health", get(handlers::health))
            .route("/api/v1/market-data/{symbol}", get(handlers::market_data))
            .route("/api/v1/news/{symbol}", get(handlers::news))
            .route("/api/v1/buffers", get(handlers::buffers))
            .route("/api/v1/stats", get(handlers::stats))
            .route("/ws", get(websocket::ws_handler))
            .route_layer(middleware::from_fn(track_metrics));

        if state.config.admin.enabled {
            router = router.merge(admin::router(state.clone()));
        }

        router
            .method_not_allowed_fallback(handlers::method_not_allowed)
            .fallback(handlers::fallback)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(|req: &HttpRequest<Body>| {
                        let request_id = req
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        tracing::info_span!(
                            "http_request",
                            method = %req.method(),
                            uri = %req.uri(),
                            request_id = %request_id,
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(max_body_bytes)),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_request(&route, response.status().as_u16(), start);
    response
}
