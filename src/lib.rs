//! API aggregation layer with a startup-readiness convergence gate.

// Core subsystems
pub mod config;
pub mod discovery;
pub mod http;
pub mod net;
pub mod registry;

// Readiness
pub mod health;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::AggregatorConfig;
pub use health::ConvergenceGate;
pub use http::HttpServer;
pub use lifecycle::{create_aggregator_config, create_aggregator_server, AggregatorServer, Shutdown};
