//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AggregatorConfig (validated, immutable)
//!     → lifecycle::bootstrap builds the aggregation layer from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only name mappings are reloaded at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AggregatorConfig, AvailabilityConfig, BackendConfig, DelegateConfig, DiscoveryConfig,
    ListenerConfig, NameMapping, NameMappingConfig, ObservabilityConfig, PriorityConfig,
    RegistryConfig, StorageCodec, TlsConfig, TransportConfig, UnknownIdentityPolicy,
};
