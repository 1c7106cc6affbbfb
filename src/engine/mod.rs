//! Analysis engine access.
//!
//! # Data Flow
//! ```text
//! handler
//!     → client.rs (DependencyClient: child deadline, trace metadata, retries)
//!     → EngineTransport (http.rs in production, stubs in tests)
//!     → engine `POST /rpc/{method}`
//! ```

pub mod client;
pub mod http;

use std::fmt;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::resilience::RpcError;

pub use client::{DependencyClient, EngineClients};
pub use http::HttpEngineTransport;

/// Dependency names, one breaker each.
pub const DEPENDENCIES: [&str; 4] = ["market_data", "news", "buffers", "stats"];

/// RPC methods exposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineMethod {
    FetchMarketData,
    FetchNews,
    GetBuffers,
    GetStats,
}

impl EngineMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineMethod::FetchMarketData => "FetchMarketData",
            EngineMethod::FetchNews => "FetchNews",
            EngineMethod::GetBuffers => "GetBuffers",
            EngineMethod::GetStats => "GetStats",
        }
    }

    /// Dependency whose breaker guards this method.
    pub const fn dependency(&self) -> &'static str {
        match self {
            EngineMethod::FetchMarketData => "market_data",
            EngineMethod::FetchNews => "news",
            EngineMethod::GetBuffers => "buffers",
            EngineMethod::GetStats => "stats",
        }
    }
}

impl fmt::Display for EngineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downstream invocation.
#[derive(Debug, Clone, Default)]
pub struct RpcRequest {
    pub payload: Value,
    /// Propagated as request headers (trace context, request id, deadline).
    pub metadata: HeaderMap,
}

/// Carries a single RPC to the engine. Failures are always coded.
#[async_trait]
pub trait EngineTransport: Send + Sync + fmt::Debug {
    async fn invoke(&self, method: EngineMethod, request: RpcRequest) -> Result<Value, RpcError>;
}
