//! API Aggregator
//!
//! Fronts a delegate server and a set of externally owned backends behind one
//! `/apis` surface, and holds readiness until every auto-registered backend has
//! been observed available once.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                  API AGGREGATOR                  │
//!                         │                                                  │
//!   Delegate routes ──────┼─▶ discovery ──▶ registry client ──▶ registry     │
//!                         │   (priority)     (sync on start)     store       │
//!                         │                        │               │         │
//!                         │                        ▼               ▼         │
//!                         │               convergence gate ◀── status feed   │
//!                         │                        │               ▲         │
//!                         │                        ▼               │         │
//!   Health probes ────────┼─▶ http ──▶ readyz / healthz     availability     │
//!                         │    │                             controller      │
//!   Client requests ──────┼─▶  └──▶ proxy ──▶ transport ──────────┼──────────┼──▶ Backends
//!                         │                                                  │
//!                         │  config · lifecycle · observability · net        │
//!                         └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api_aggregator::config::{load_config, AggregatorConfig};
use api_aggregator::discovery::StaticDelegate;
use api_aggregator::lifecycle::signals::wait_for_signal;
use api_aggregator::lifecycle::{
    create_aggregator_config, create_aggregator_server, SharedServerConfig, Shutdown,
};
use api_aggregator::observability::{logging, metrics};
use api_aggregator::registry::MemoryRegistry;

#[derive(Parser)]
#[command(name = "api-aggregator")]
#[command(about = "API aggregation layer with a startup readiness gate", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AggregatorConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("api-aggregator v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        listed_paths = config.delegate.listed_paths.len(),
        external_backends = config.backends.len(),
        unknown_identity_policy = ?config.discovery.unknown_identity_policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shared = SharedServerConfig::new(config.listener.clone());
    let completed = create_aggregator_config(&shared, &config)?;
    let store = Arc::new(MemoryRegistry::new(completed.storage.clone()));
    let delegate = StaticDelegate::new(config.delegate.listed_paths.clone());

    let shutdown = Shutdown::new();
    let server = create_aggregator_server(completed, &delegate, store, shutdown.clone())?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(wait_for_signal(shutdown.clone()));
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
