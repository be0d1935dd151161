//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (bootstrap.rs):
//!     Shared server config → working copy → storage options → resolver
//!     → transport → AggregatorConfig
//!     → derive backends → submit → seed gate → register boot check
//!     → post-start hooks (hooks.rs) once serving
//!
//! Shutdown (shutdown.rs):
//!     Signal received → background loops exit → drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: configuration errors are fatal and returned
//! - Registration is best-effort per backend
//! - Background loops start only after the server is serving

pub mod bootstrap;
pub mod hooks;
pub mod shutdown;
pub mod signals;

pub use bootstrap::{
    create_aggregator_config, create_aggregator_server, AggregatorServer, BootstrapError,
    CompletedConfig, ConfigurationError, SharedServerConfig,
};
pub use hooks::{PostStartHookContext, PostStartHooks};
pub use shutdown::Shutdown;
