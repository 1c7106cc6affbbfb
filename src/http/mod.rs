//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id / trace / body-limit layers)
//!     → request.rs (call context from headers, input validation)
//!     → handlers.rs (REST routes) or websocket.rs (/ws sessions)
//!     → engine::DependencyClient (resilient engine call)
//!     → response.rs (success or error envelope)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestContext, X_REQUEST_ID};
pub use response::{ApiError, ErrorEnvelope, SuccessEnvelope};
pub use server::{AppState, HttpServer};
