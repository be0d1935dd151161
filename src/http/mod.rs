//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → health endpoints (health::HealthChecks)
//!     → /aggregator/backends (registry listing, discovery order)
//!     → /apis/{group}/{version}/... → proxy.rs → backend
//! ```

pub mod proxy;
pub mod request;
pub mod server;

pub use proxy::Forwarder;
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{build_router, AppState, BackendStatus, HttpServer};
