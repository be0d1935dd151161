//! Discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Delegate server (listed route prefixes)
//!     → routes.rs (parse /api/v1, /apis/{group}/{version})
//!     → priority.rs (attach group/version priority, skip unknown)
//!     → BackendDescriptor[] in route order
//!     → registry (sync on start)
//! ```
//!
//! # Design Decisions
//! - The priority table is data, passed in; no ambient globals
//! - Registration order follows routes; priority only orders discovery output

pub mod priority;
pub mod routes;

pub use priority::{GroupVersion, Priority, PriorityTable};
pub use routes::{derive_backends, DerivedBackends};

/// The server whose routes are aggregated behind the frontend.
pub trait DelegationTarget: Send + Sync {
    /// Route prefixes exposed by the delegate, in registration order.
    fn listed_paths(&self) -> Vec<String>;
}

/// A delegate whose routes are known up front (configuration or tests).
#[derive(Debug, Clone, Default)]
pub struct StaticDelegate {
    paths: Vec<String>,
}

impl StaticDelegate {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

impl DelegationTarget for StaticDelegate {
    fn listed_paths(&self) -> Vec<String> {
        self.paths.clone()
    }
}
