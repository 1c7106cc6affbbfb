//! Resilient per-dependency engine clients.
//!
//! Each [`DependencyClient`] owns one breaker and retry policy. Calls derive a
//! child context bounded by the dependency deadline, stamp trace metadata on
//! every attempt, and come back as client-safe [`ClientError`]s. Raw transport
//! errors never leave this module.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::engine::{EngineMethod, EngineTransport, RpcRequest};
use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;
use crate::observability::tracing::TRACEPARENT;
use crate::resilience::clock::{Clock, SystemClock};
use crate::resilience::{
    BreakerSnapshot, CallContext, CircuitBreaker, ClientError, RetriableBreaker,
};

pub const X_DEADLINE_MS: &str = "x-deadline-ms";
pub const X_ATTEMPT: &str = "x-attempt";

#[derive(Debug, Clone)]
pub struct DependencyClient {
    method: EngineMethod,
    transport: Arc<dyn EngineTransport>,
    retriable: RetriableBreaker,
    deadline: Duration,
}

impl DependencyClient {
    pub fn new(
        method: EngineMethod,
        transport: Arc<dyn EngineTransport>,
        retriable: RetriableBreaker,
        deadline: Duration,
    ) -> Self {
        Self {
            method,
            transport,
            retriable,
            deadline,
        }
    }

    pub fn name(&self) -> &'static str {
        self.method.dependency()
    }

    pub fn method(&self) -> EngineMethod {
        self.method
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.retriable.breaker()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Invoke the dependency under its breaker and retry policy.
    pub async fn call(&self, ctx: &CallContext, payload: Value) -> Result<Value, ClientError> {
        let name = self.name();
        let ctx = ctx.child(self.deadline);
        let start = Instant::now();
        let span = tracing::info_span!(
            "dependency_call",
            dependency = name,
            method = %self.method,
            request_id = %ctx.request_id(),
            trace_id = %ctx.trace().trace_id(),
        );

        let result = self
            .retriable
            .execute(&ctx, |attempt| {
                let request = RpcRequest {
                    payload: payload.clone(),
                    metadata: attempt_metadata(&ctx, attempt),
                };
                let transport = self.transport.clone();
                let method = self.method;
                async move { transport.invoke(method, request).await }
            })
            .instrument(span)
            .await;

        match result {
            Ok(value) => {
                metrics::record_dependency_call(name, "success", start);
                Ok(value)
            }
            Err(error) => {
                let client_error = self.retriable.policy().classifier.translate(&error, name);
                metrics::record_dependency_call(name, client_error.kind.as_str(), start);
                tracing::warn!(
                    dependency = name,
                    request_id = %ctx.request_id(),
                    attempts = error.attempts(),
                    kind = %client_error.kind,
                    status = client_error.status.as_u16(),
                    error = %error,
                    "Dependency call failed"
                );
                Err(client_error)
            }
        }
    }
}

/// Headers for one attempt: fresh span under the caller's trace, request id,
/// and the time left before the deadline.
fn attempt_metadata(ctx: &CallContext, attempt: u32) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let span = ctx.trace().child();

    insert(&mut headers, TRACEPARENT, &span.to_header());
    insert(&mut headers, X_REQUEST_ID, ctx.request_id());
    insert(&mut headers, X_ATTEMPT, &attempt.to_string());
    if let Some(remaining) = ctx.remaining() {
        insert(&mut headers, X_DEADLINE_MS, &remaining.as_millis().to_string());
    }
    headers
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Every engine dependency, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineClients {
    pub market_data: DependencyClient,
    pub news: DependencyClient,
    pub buffers: DependencyClient,
    pub stats: DependencyClient,
}

impl EngineClients {
    pub fn from_config(config: &GatewayConfig, transport: Arc<dyn EngineTransport>) -> Self {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Build with an explicit breaker clock.
    pub fn with_clock(
        config: &GatewayConfig,
        transport: Arc<dyn EngineTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let build = |method: EngineMethod| {
            let name = method.dependency();
            let settings = config.resilience_for(name);
            tracing::info!(dependency = name, settings = %settings.describe(), "Dependency configured");

            let breaker = Arc::new(CircuitBreaker::with_clock(
                name,
                settings.breaker_config(),
                clock.clone(),
            ));
            DependencyClient::new(
                method,
                transport.clone(),
                RetriableBreaker::new(breaker, settings.retry_policy()),
                settings.deadline(),
            )
        };

        Self {
            market_data: build(EngineMethod::FetchMarketData),
            news: build(EngineMethod::FetchNews),
            buffers: build(EngineMethod::GetBuffers),
            stats: build(EngineMethod::GetStats),
        }
    }

    pub fn all(&self) -> [&DependencyClient; 4] {
        [&self.market_data, &self.news, &self.buffers, &self.stats]
    }

    pub fn get(&self, name: &str) -> Option<&DependencyClient> {
        self.all().into_iter().find(|c| c.name() == name)
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.all().iter().map(|c| c.breaker().snapshot()).collect()
    }
}
