//! Outbound transport used to reach aggregated backends.
//!
//! # Responsibilities
//! - Build the HTTP client the forwarding path and availability probes share
//! - Relax TLS hostname verification (backends are addressed by IP)
//! - Apply default tuning: keep-alive, idle pool, connect timeout, proxy env
//! - Offer an injection point for a custom dialer (name resolution)
//!
//! # Design Decisions
//! - Certificate chains are still verified; only the hostname check is skipped
//! - No dialer override unless one is supplied
//! - The client is cheap to clone; one transport is built per process

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::dns::Resolve;
use reqwest::ClientBuilder;
use thiserror::Error;

use crate::config::TransportConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid proxy client identity: {0}")]
    Identity(#[source] reqwest::Error),

    #[error("failed to build proxy transport: {0}")]
    Build(#[source] reqwest::Error),
}

type Dialer = Box<dyn FnOnce(ClientBuilder) -> ClientBuilder + Send>;

/// Builder for the proxy transport.
pub struct ProxyTransportBuilder {
    config: TransportConfig,
    dialer: Option<Dialer>,
}

impl ProxyTransportBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, dialer: None }
    }

    /// Resolve backend hosts through `resolver` instead of system DNS.
    pub fn dialer<R>(mut self, resolver: Arc<R>) -> Self
    where
        R: Resolve + 'static,
    {
        self.dialer = Some(Box::new(move |builder: ClientBuilder| builder.dns_resolver(resolver)));
        self
    }

    pub fn build(self) -> Result<ProxyTransport, TransportError> {
        let config = self.config;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.keepalive_secs))
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .danger_accept_invalid_hostnames(config.skip_hostname_verification);

        if !config.honor_proxy_env {
            builder = builder.no_proxy();
        }

        let has_client_identity = match (&config.client_cert_path, &config.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert = read_pem(cert_path)?;
                let key = read_pem(key_path)?;
                let identity =
                    reqwest::Identity::from_pkcs8_pem(&cert, &key).map_err(TransportError::Identity)?;
                builder = builder.identity(identity);
                true
            }
            _ => false,
        };

        let has_dialer = self.dialer.is_some();
        if let Some(dialer) = self.dialer {
            builder = dialer(builder);
        }

        let client = builder.build().map_err(TransportError::Build)?;

        tracing::debug!(
            skip_hostname_verification = config.skip_hostname_verification,
            honor_proxy_env = config.honor_proxy_env,
            has_client_identity,
            has_dialer,
            "Proxy transport built"
        );

        Ok(ProxyTransport {
            client,
            skip_hostname_verification: config.skip_hostname_verification,
            has_client_identity,
            has_dialer,
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TransportError> {
    fs::read(path).map_err(|source| TransportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Connection policy for forwarding requests to backends.
#[derive(Debug, Clone)]
pub struct ProxyTransport {
    client: reqwest::Client,
    skip_hostname_verification: bool,
    has_client_identity: bool,
    has_dialer: bool,
}

impl ProxyTransport {
    /// Transport with default settings.
    pub fn with_defaults() -> Result<Self, TransportError> {
        ProxyTransportBuilder::new(TransportConfig::default()).build()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn skips_hostname_verification(&self) -> bool {
        self.skip_hostname_verification
    }

    pub fn has_client_identity(&self) -> bool {
        self.has_client_identity
    }

    pub fn has_dialer(&self) -> bool {
        self.has_dialer
    }
}
