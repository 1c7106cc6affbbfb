//! Engine gateway library: a resilient HTTP/WebSocket front for the analysis engine.

// Core subsystems
pub mod config;
pub mod engine;
pub mod http;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GatewayConfig;
pub use engine::{EngineClients, HttpEngineTransport};
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
