//! Configuration schema definitions.
//!
//! Every section defaults, so an empty file (or no file at all) yields a
//! runnable gateway. Durations are integers with an explicit unit suffix.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{
    CircuitBreakerConfig, ErrorClassifier, RetryPolicy, RpcCode,
};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Client-facing listener.
    pub listener: ListenerConfig,

    /// Analysis engine connection.
    pub engine: EngineConfig,

    /// Resilience defaults applied to every dependency.
    pub resilience: ResilienceConfig,

    /// Per-dependency overrides keyed by dependency name.
    pub dependencies: BTreeMap<String, DependencyOverrides>,

    pub websocket: WebSocketConfig,

    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl GatewayConfig {
    /// Effective resilience settings for one dependency.
    pub fn resilience_for(&self, dependency: &str) -> ResilienceConfig {
        match self.dependencies.get(dependency) {
            Some(overrides) => self.resilience.merged(overrides),
            None => self.resilience.clone(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Analysis engine endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL; calls go to `{endpoint}/rpc/{method}`.
    pub endpoint: String,

    pub connect_timeout_ms: u64,

    /// Largest engine response body accepted, in bytes.
    pub max_response_bytes: usize,
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:50051".to_string(),
            connect_timeout_ms: 2_000,
            max_response_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Breaker, retry and deadline settings for a dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Consecutive failures that open the breaker.
    pub max_failures: u32,

    /// Bound on a single attempt; 0 disables it.
    pub open_timeout_ms: u64,

    /// Time the breaker stays open before admitting a trial call.
    pub reset_timeout_ms: u64,

    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_fraction: f64,

    /// Engine codes worth retrying.
    pub retryable_codes: Vec<RpcCode>,

    /// Overall budget for one logical call, retries included.
    pub deadline_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout_ms: 0,
            reset_timeout_ms: 30_000,
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_fraction: 0.2,
            retryable_codes: ErrorClassifier::DEFAULT_RETRYABLE.to_vec(),
            deadline_ms: 10_000,
        }
    }
}

impl ResilienceConfig {
    /// Apply the fields set in `overrides` on top of `self`.
    pub fn merged(&self, overrides: &DependencyOverrides) -> Self {
        Self {
            max_failures: overrides.max_failures.unwrap_or(self.max_failures),
            open_timeout_ms: overrides.open_timeout_ms.unwrap_or(self.open_timeout_ms),
            reset_timeout_ms: overrides.reset_timeout_ms.unwrap_or(self.reset_timeout_ms),
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            initial_delay_ms: overrides.initial_delay_ms.unwrap_or(self.initial_delay_ms),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
            multiplier: overrides.multiplier.unwrap_or(self.multiplier),
            jitter_fraction: overrides.jitter_fraction.unwrap_or(self.jitter_fraction),
            retryable_codes: overrides
                .retryable_codes
                .clone()
                .unwrap_or_else(|| self.retryable_codes.clone()),
            deadline_ms: overrides.deadline_ms.unwrap_or(self.deadline_ms),
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.max_failures,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter_fraction: self.jitter_fraction,
            classifier: ErrorClassifier::new(self.retryable_codes.iter().copied()),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Summary line for startup logs.
    pub fn describe(&self) -> String {
        format!(
            "max_failures={} reset={}ms call_timeout={}ms retries={} backoff={}ms..{}ms x{} jitter={} deadline={}ms",
            self.max_failures,
            self.reset_timeout_ms,
            self.open_timeout_ms,
            self.max_retries,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            self.jitter_fraction,
            self.deadline_ms,
        )
    }
}

/// Partial resilience settings for one dependency. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DependencyOverrides {
    pub max_failures: Option<u32>,
    pub open_timeout_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter_fraction: Option<f64>,
    pub retryable_codes: Option<Vec<RpcCode>>,
    pub deadline_ms: Option<u64>,
}

/// WebSocket session limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Messages processed concurrently per connection.
    pub max_in_flight: usize,

    /// Outbound frames buffered ahead of the writer task.
    pub outbound_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            outbound_buffer: 64,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
        }
    }
}
