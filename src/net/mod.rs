//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Frontend:
//!     TcpListener → tls.rs (optional rustls) → http server
//!
//! Backend:
//!     service name → resolver.rs (name mappings, watched file)
//!     → base URL → transport.rs (shared HTTP client) → backend
//! ```
//!
//! # Design Decisions
//! - One outbound transport per process, shared by forwarding and probing
//! - Name mappings are swapped atomically; lookups never block on reload

pub mod resolver;
pub mod tls;
pub mod transport;

pub use resolver::{backend_url, ExternalNameResolver, NameMappingWatcher, NameMappings, ResolveError};
pub use transport::{ProxyTransport, ProxyTransportBuilder, TransportError};
