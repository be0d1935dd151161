//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse)
//! - Detect duplicate priority entries and backends
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AggregatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AggregatorConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the configuration, collecting every problem found.
pub fn validate_config(config: &AggregatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be greater than 0"));
    }

    for (i, path) in config.delegate.listed_paths.iter().enumerate() {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("delegate.listed_paths[{}]", i),
                format!("'{}' must start with '/'", path),
            ));
        }
    }

    if config.discovery.remind_interval_secs == 0 {
        errors.push(ValidationError::new("discovery.remind_interval_secs", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, entry) in config.priorities.iter().enumerate() {
        if entry.version.is_empty() {
            errors.push(ValidationError::new(format!("priorities[{}].version", i), "must not be empty"));
        }
        if !seen.insert((entry.group.as_str(), entry.version.as_str())) {
            errors.push(ValidationError::new(
                format!("priorities[{}]", i),
                format!("duplicate entry for {}/{}", entry.group, entry.version),
            ));
        }
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        if backend.group.is_empty() {
            errors.push(ValidationError::new(format!("backends[{}].group", i), "must not be empty"));
        }
        if backend.version.is_empty() {
            errors.push(ValidationError::new(format!("backends[{}].version", i), "must not be empty"));
        }
        if backend.service.is_empty() {
            errors.push(ValidationError::new(format!("backends[{}].service", i), "must not be empty"));
        }
        if !seen.insert((backend.group.as_str(), backend.version.as_str())) {
            errors.push(ValidationError::new(
                format!("backends[{}]", i),
                format!("duplicate backend {}/{}", backend.group, backend.version),
            ));
        }
    }

    if config.registry.sync_interval_secs == 0 {
        errors.push(ValidationError::new("registry.sync_interval_secs", "must be greater than 0"));
    }
    if !config.registry.storage_prefix.starts_with('/') {
        errors.push(ValidationError::new("registry.storage_prefix", "must start with '/'"));
    }

    if config.availability.interval_secs == 0 {
        errors.push(ValidationError::new("availability.interval_secs", "must be greater than 0"));
    }
    if config.availability.timeout_secs == 0 {
        errors.push(ValidationError::new("availability.timeout_secs", "must be greater than 0"));
    }

    if config.transport.client_cert_path.is_some() != config.transport.client_key_path.is_some() {
        errors.push(ValidationError::new(
            "transport.client_cert_path",
            "client certificate and key must be set together",
        ));
    }

    let mut seen = HashSet::new();
    for (i, mapping) in config.name_mappings.mappings.iter().enumerate() {
        if !seen.insert(mapping.name.as_str()) {
            errors.push(ValidationError::new(
                format!("name_mappings.mappings[{}]", i),
                format!("duplicate mapping for '{}'", mapping.name),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, PriorityConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AggregatorConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = AggregatorConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.registry.sync_interval_secs = 0;
        config.delegate.listed_paths.push("apis/g/v1".into());
        config.transport.client_cert_path = Some("cert.pem".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "delegate.listed_paths[0]",
                "registry.sync_interval_secs",
                "transport.client_cert_path",
            ]
        );
    }

    #[test]
    fn rejects_duplicates() {
        let mut config = AggregatorConfig::default();
        for _ in 0..2 {
            config.priorities.push(PriorityConfig {
                group: "g".into(),
                version: "v1".into(),
                group_priority: 100,
                version_priority: 9,
            });
            config.backends.push(BackendConfig {
                group: "ext".into(),
                version: "v1".into(),
                service: "ext-svc".into(),
                group_priority: 100,
                version_priority: 9,
            });
        }

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("duplicate entry"));
        assert!(errors[1].message.contains("duplicate backend"));
    }
}
