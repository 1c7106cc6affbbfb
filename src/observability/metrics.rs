//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): client requests by route, status
//! - `gateway_request_duration_seconds` (histogram): client-facing latency
//! - `gateway_dependency_calls_total` (counter): resilient calls by dependency, outcome
//! - `gateway_dependency_call_duration_seconds` (histogram): latency incl. retries
//! - `gateway_retries_total` (counter): backoff sleeps by dependency
//! - `gateway_breaker_rejections_total` (counter): fail-fast rejections
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_websocket_connections` (gauge): open WebSocket sessions
//!
//! Without an installed recorder every call here is a no-op, which keeps unit
//! tests free of exporter setup.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!(
        "gateway_requests_total",
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_dependency_call(dependency: &str, outcome: &'static str, start: Instant) {
    counter!(
        "gateway_dependency_calls_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_dependency_call_duration_seconds",
        "dependency" => dependency.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(dependency: &str) {
    counter!("gateway_retries_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_breaker_rejection(dependency: &str) {
    counter!("gateway_breaker_rejections_total", "dependency" => dependency.to_string())
        .increment(1);
}

pub fn record_breaker_state(dependency: &str, state: CircuitState) {
    gauge!("gateway_breaker_state", "dependency" => dependency.to_string()).set(state.as_gauge());
}

pub fn websocket_opened() {
    gauge!("gateway_websocket_connections").increment(1.0);
}

pub fn websocket_closed() {
    gauge!("gateway_websocket_connections").decrement(1.0);
}
