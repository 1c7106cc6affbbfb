//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use engine_gateway::config::GatewayConfig;
use engine_gateway::engine::EngineClients;
use engine_gateway::{AppState, HttpEngineTransport, HttpServer, Shutdown};

/// One scripted engine answer.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn error(status: u16, code: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({ "code": code, "message": message }),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = dyn Fn(&str, u32, &Value) -> Reply + Send + Sync;

#[derive(Clone)]
struct MockState {
    calls: Arc<AtomicU32>,
    responder: Arc<Responder>,
}

/// A programmable stand-in for the analysis engine.
pub struct MockEngine {
    pub addr: SocketAddr,
    calls: Arc<AtomicU32>,
}

impl MockEngine {
    /// Start an engine whose answer depends on the method, the zero-based
    /// call index and the request payload.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, u32, &Value) -> Reply + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicU32::new(0));
        let state = MockState {
            calls: calls.clone(),
            responder: Arc::new(responder),
        };

        let app = Router::new()
            .route("/rpc/{method}", post(handle_rpc))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, calls }
    }

    /// Engine that answers every call with the same body.
    pub async fn fixed(body: Value) -> Self {
        Self::start(move |_, _, _| Reply::ok(body.clone())).await
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn handle_rpc(
    State(state): State<MockState>,
    Path(method): Path<String>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let index = state.calls.fetch_add(1, Ordering::SeqCst);
    let reply = (state.responder)(&method, index, &payload);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap();
    (status, Json(reply.body))
}

/// Config pointed at `endpoint` with fast retries for tests.
pub fn test_config(endpoint: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.engine.endpoint = endpoint.to_string();
    config.engine.connect_timeout_ms = 500;
    config.resilience.initial_delay_ms = 10;
    config.resilience.max_delay_ms = 50;
    config.resilience.deadline_ms = 5_000;
    config.observability.metrics_enabled = false;
    config
}

/// A gateway serving on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let transport = Arc::new(HttpEngineTransport::new(&config.engine));
    let clients = EngineClients::from_config(&config, transport);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let state = AppState::new(config, clients, shutdown.token());
    let server = HttpServer::new(state);
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    TestGateway { addr, shutdown }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
