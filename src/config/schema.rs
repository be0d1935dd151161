//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the aggregator.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the API aggregator.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// The delegate server whose routes are aggregated.
    pub delegate: DelegateConfig,

    /// Handling of identities absent from the priority table.
    pub discovery: DiscoveryConfig,

    /// Operator extensions to the built-in priority table.
    pub priorities: Vec<PriorityConfig>,

    /// Externally owned backends registered at startup.
    pub backends: Vec<BackendConfig>,

    /// Registration store and sync loop settings.
    pub registry: RegistryConfig,

    /// Availability probing settings.
    pub availability: AvailabilityConfig,

    /// Outbound proxy transport settings.
    pub transport: TransportConfig,

    /// Backend name to address mappings.
    pub name_mappings: NameMappingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Request timeout in seconds for the frontend.
    pub request_timeout_secs: u64,

    /// Grace period for draining connections on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: None,
            request_timeout_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Delegate server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DelegateConfig {
    /// Route prefixes served by the delegate (e.g., "/api/v1", "/apis/g/v1").
    pub listed_paths: Vec<String>,

    /// Base URL requests for local backends are forwarded to.
    pub address: Option<url::Url>,
}

/// What to do with listed identities that have no priority entry.
///
/// Such identities are never registered under any policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownIdentityPolicy {
    /// Debug log only.
    Silent,
    /// Log once at startup.
    #[default]
    Log,
    /// Log at startup, then again on every remind interval.
    Remind,
}

/// Discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub unknown_identity_policy: UnknownIdentityPolicy,

    /// Interval between reminders under `UnknownIdentityPolicy::Remind`.
    pub remind_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            unknown_identity_policy: UnknownIdentityPolicy::Log,
            remind_interval_secs: 300,
        }
    }
}

/// A priority table entry supplied by the operator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriorityConfig {
    /// API group ("" for the core group).
    #[serde(default)]
    pub group: String,

    pub version: String,

    pub group_priority: i32,

    pub version_priority: i32,
}

/// An externally owned backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub group: String,

    pub version: String,

    /// Service name resolved through the name mappings.
    pub service: String,

    #[serde(default = "default_group_priority")]
    pub group_priority: i32,

    #[serde(default = "default_version_priority")]
    pub version_priority: i32,
}

fn default_group_priority() -> i32 {
    1000
}

fn default_version_priority() -> i32 {
    9
}

/// Codec used for persisted registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageCodec {
    #[default]
    Json,
}

/// Registration store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval of the sync-on-start loop in seconds.
    pub sync_interval_secs: u64,

    /// Key prefix for persisted registrations.
    pub storage_prefix: String,

    pub codec: StorageCodec,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            storage_prefix: "/registry/aggregator".to_string(),
            codec: StorageCodec::Json,
        }
    }
}

/// Availability controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Enable the availability controller.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 5,
        }
    }
}

/// Outbound transport used when forwarding to backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// TCP keep-alive interval in seconds.
    pub keepalive_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Maximum idle connections kept per host.
    pub max_idle_per_host: usize,

    /// Honour HTTP_PROXY / HTTPS_PROXY / NO_PROXY.
    pub honor_proxy_env: bool,

    /// Skip certificate hostname verification (backends are addressed by IP).
    pub skip_hostname_verification: bool,

    /// Client certificate presented to backends (PEM).
    pub client_cert_path: Option<PathBuf>,

    /// Private key for the client certificate (PKCS#8 PEM).
    pub client_key_path: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            keepalive_secs: 30,
            idle_timeout_secs: 90,
            max_idle_per_host: 100,
            honor_proxy_env: true,
            skip_hostname_verification: true,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

/// A single backend name to base URL mapping.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct NameMapping {
    pub name: String,
    pub address: url::Url,
}

/// Name mapping configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct NameMappingConfig {
    /// Mappings known at startup.
    pub mappings: Vec<NameMapping>,

    /// Optional TOML file of `[[mappings]]`, watched for changes.
    pub path: Option<PathBuf>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
