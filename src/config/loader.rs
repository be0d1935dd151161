//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AggregatorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AggregatorConfig, ConfigError> {
    let config: AggregatorConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<AggregatorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnknownIdentityPolicy;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8443");
        assert_eq!(config.discovery.unknown_identity_policy, UnknownIdentityPolicy::Log);
        assert!(config.transport.skip_hostname_verification);
    }

    #[test]
    fn loads_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
bind_address = "127.0.0.1:9443"

[delegate]
listed_paths = ["/api/v1", "/apis/dashboard.grafana.app/v0alpha1"]
address = "http://127.0.0.1:3000"

[discovery]
unknown_identity_policy = "remind"
remind_interval_secs = 60

[[priorities]]
group = "dashboard.grafana.app"
version = "v0alpha1"
group_priority = 16600
version_priority = 9

[[backends]]
group = "query.grafana.app"
version = "v0alpha1"
service = "query-service"

[[name_mappings.mappings]]
name = "query-service"
address = "https://10.0.0.7:6443"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.delegate.listed_paths.len(), 2);
        assert_eq!(config.discovery.unknown_identity_policy, UnknownIdentityPolicy::Remind);
        assert_eq!(config.priorities[0].group_priority, 16600);
        assert_eq!(config.backends[0].group_priority, 1000);
        assert_eq!(config.name_mappings.mappings[0].address.as_str(), "https://10.0.0.7:6443/");
    }

    #[test]
    fn reports_validation_errors() {
        let err = parse_config("[registry]\nsync_interval_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert_eq!(
            err.to_string(),
            "Validation failed: registry.sync_interval_secs: must be greater than 0"
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/aggregator.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
