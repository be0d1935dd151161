//! Backend registration subsystem.
//!
//! # Data Flow
//! ```text
//! Route deriver
//!     → BackendDescriptor (identity + priority)
//!     → client.rs (sync-on-start list, submit, mark pending)
//!     → store.rs (RegistryStore: persisted registrations)
//!     → StatusEvent feed (every create / status write)
//!     → health::listener (convergence gate)
//! ```
//!
//! # Design Decisions
//! - Descriptors are immutable once built
//! - Submission is at-least-once; the store upserts idempotently
//! - The store owns the status-change feed, consumers only subscribe

pub mod client;
pub mod store;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::discovery::priority::{GroupVersion, Priority};

pub use client::PriorityRegistryClient;
pub use store::MemoryRegistry;

/// Reference to the externally owned service backing a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReference {
    /// Name looked up through the external-name resolver.
    pub name: String,
}

/// The unit submitted to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    identity: GroupVersion,
    priority: Priority,
    service: Option<ServiceReference>,
}

impl BackendDescriptor {
    /// A backend served by the delegate server itself.
    pub fn local(identity: GroupVersion, priority: Priority) -> Self {
        Self {
            identity,
            priority,
            service: None,
        }
    }

    /// A backend served by an externally owned service.
    pub fn external(identity: GroupVersion, priority: Priority, service: ServiceReference) -> Self {
        Self {
            identity,
            priority,
            service: Some(service),
        }
    }

    pub fn identity(&self) -> &GroupVersion {
        &self.identity
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn service(&self) -> Option<&ServiceReference> {
        self.service.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.service.is_none()
    }

    /// Registry key (`version.group`).
    pub fn name(&self) -> String {
        self.identity.backend_name()
    }
}

/// A persisted registration with its last observed availability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub descriptor: BackendDescriptor,
    pub available: bool,
    pub message: Option<String>,
}

/// Notification that a backend's availability condition was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub identity: GroupVersion,
    pub available: bool,
}

/// Outcome of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Unchanged,
}

/// Errors from the registration collaborator.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The identity is already registered with a different priority or service.
    #[error("registration conflict for {identity}: {reason}")]
    Conflict { identity: GroupVersion, reason: String },

    /// The identity has no registration.
    #[error("no registration for {0}")]
    NotFound(GroupVersion),

    /// The backing storage could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The registration could not be encoded for storage.
    #[error("failed to encode registration: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistence collaborator for backend registrations.
pub trait RegistryStore: Send + Sync {
    /// Create the registration, or accept an identical existing one.
    fn upsert(&self, descriptor: &BackendDescriptor) -> Result<UpsertOutcome, RegistrationError>;

    fn get(&self, identity: &GroupVersion) -> Option<Registration>;

    fn list(&self) -> Vec<Registration>;

    /// Record an observed availability condition. Emits a `StatusEvent` on every call.
    fn set_available(
        &self,
        identity: &GroupVersion,
        available: bool,
        message: Option<String>,
    ) -> Result<(), RegistrationError>;

    /// Subscribe to status-change events.
    fn subscribe(&self) -> broadcast::Receiver<StatusEvent>;
}

/// Sink for descriptors that must be kept registered from process start.
pub trait SyncOnStart {
    fn add_to_sync_on_start(&self, descriptor: BackendDescriptor);
}
