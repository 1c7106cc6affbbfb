//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! DependencyClient call:
//!     → timeouts.rs (child context: deadline + cancellation)
//!     → retries.rs (attempt loop)
//!         → circuit_breaker.rs (admission, outcome bookkeeping)
//!         → classifier.rs (retryable or fatal, once per failure)
//!         → backoff.rs (delay before the next attempt)
//!     → classifier.rs (CallError → client-facing error)
//! ```
//!
//! Breakers and policies are per dependency and built once at startup.

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod clock;
pub mod error;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use classifier::{ClientError, ErrorClassifier};
pub use error::{CallError, ErrorKind, RpcCode, RpcError};
pub use retries::{RetriableBreaker, RetryPolicy};
pub use timeouts::CallContext;
