//! Health and readiness subsystem.
//!
//! # Data Flow
//! ```text
//! Availability (availability.rs):
//!     Periodic timer
//!     → Evaluate each registration (local: available, external: probe)
//!     → registry store status write → StatusEvent
//!
//! Convergence (listener.rs → gate.rs):
//!     StatusEvent feed
//!     → remove identity from the pending set on first available=true
//!
//! Endpoints (checks.rs):
//!     healthz / livez / readyz
//!     → boot-sequence checks (ping, autoregister-completion)
//!     → readiness-only checks (shutdown)
//! ```
//!
//! # Design Decisions
//! - The gate is a one-time latch; availability after startup is the controller's concern
//! - Probes are pure in-memory reads
//! - Background loops stop on the process shutdown signal

pub mod availability;
pub mod checks;
pub mod gate;
pub mod listener;

pub use availability::AvailabilityController;
pub use checks::{HealthCheck, HealthChecks};
pub use gate::{ConvergenceGate, PendingBackendsError, GATE_CHECK_NAME};
pub use listener::StatusListener;
