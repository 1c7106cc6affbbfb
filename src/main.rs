//! Engine Gateway
//!
//! Client-facing HTTP/WebSocket gateway in front of the analysis engine.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                      ENGINE GATEWAY                      │
//!                     │                                                          │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌──────────────────────┐   │
//!   ──────────────────┼─▶│  http   │──▶│ handlers │──▶│  DependencyClient    │   │
//!                     │  │ server  │   │   / ws   │   │  (per dependency)    │   │
//!                     │  └─────────┘   └──────────┘   └──────────┬───────────┘   │
//!                     │                                          │               │
//!                     │                              ┌───────────▼───────────┐   │
//!                     │                              │   RetriableBreaker    │   │
//!                     │                              │ breaker/retry/backoff │   │
//!                     │                              └───────────┬───────────┘   │
//!                     │                                          │               │
//!   Client Response   │  ┌──────────┐                ┌───────────▼───────────┐   │
//!   ◀─────────────────┼──│ envelope │◀───────────────│   EngineTransport     │◀──┼── Engine
//!                     │  └──────────┘                └───────────────────────┘   │
//!                     │                                                          │
//!                     │   config · observability · lifecycle · admin             │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use engine_gateway::config::load_config;
use engine_gateway::lifecycle::signals::spawn_signal_handler;
use engine_gateway::observability::{logging, metrics};
use engine_gateway::{AppState, EngineClients, HttpEngineTransport, HttpServer, Shutdown};

const DRAIN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "engine-gateway", version, about = "Resilient gateway for the analysis engine")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        engine = %config.engine.endpoint,
        "engine-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let transport = Arc::new(HttpEngineTransport::new(&config.engine));
    let clients = EngineClients::from_config(&config, transport);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let state = AppState::new(config, clients, shutdown.token());
    let server = HttpServer::new(state);
    let mut serve = tokio::spawn(server.run(listener));

    tokio::select! {
        result = &mut serve => {
            result??;
            tracing::info!("Server exited");
            return Ok(());
        }
        _ = shutdown.wait() => {}
    }

    if Shutdown::drain(DRAIN_GRACE, serve).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown forced after grace period");
    }
    Ok(())
}
