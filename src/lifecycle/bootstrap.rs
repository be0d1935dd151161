//! Aggregation bootstrap.
//!
//! # Responsibilities
//! - Derive the aggregation layer's configuration from the shared server config
//! - Scope storage options to the aggregation layer's own persisted types
//! - Build the external-name resolver and the proxy transport
//! - Derive, submit and gate the delegate's backends
//! - Register the convergence gate as a boot-sequence health check
//! - Queue the background loops as post-start hooks
//!
//! # Design Decisions
//! - Steps run in a fixed order; configuration errors are fatal and returned
//! - Registration is best-effort: one failed submit never aborts the others
//! - The gate is sealed before its probe is registered
//! - Background loops start only once the server is serving

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::validation::validate_config;
use crate::config::{AggregatorConfig, ConfigError, ListenerConfig};
use crate::discovery::priority::{GroupVersion, Priority, PriorityTable};
use crate::discovery::{derive_backends, DelegationTarget};
use crate::health::checks::{shutdown_check, HealthRegistryError};
use crate::health::{
    AvailabilityController, ConvergenceGate, HealthCheck, HealthChecks, StatusListener,
    GATE_CHECK_NAME,
};
use crate::http::HttpServer;
use crate::lifecycle::hooks::{HookError, PostStartHooks};
use crate::lifecycle::Shutdown;
use crate::net::{
    ExternalNameResolver, NameMappingWatcher, NameMappings, ProxyTransport, ProxyTransportBuilder,
    ResolveError, TransportError,
};
use crate::observability::metrics;
use crate::registry::store::{StorageOptions, REGISTRATION_GROUP};
use crate::registry::{BackendDescriptor, PriorityRegistryClient, RegistryStore, ServiceReference};

pub const REGISTRATION_SYNC_HOOK: &str = "start-aggregator-registration-sync";
pub const STATUS_LISTENER_HOOK: &str = "start-aggregator-status-listener";
pub const AVAILABILITY_HOOK: &str = "start-aggregator-availability-controller";
pub const NAME_MAPPING_WATCH_HOOK: &str = "start-aggregator-name-mapping-watch";

/// Fatal errors while assembling the aggregation layer's configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("invalid storage options: {0}")]
    Storage(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to load name mappings: {0}")]
    NameMappings(#[from] ResolveError),
}

/// Fatal errors during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("health check registration failed: {0}")]
    HealthCheck(#[from] HealthRegistryError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration shared with the caller that embeds the aggregation layer.
#[derive(Debug, Default)]
pub struct SharedServerConfig {
    pub listener: ListenerConfig,
    pub post_start_hooks: PostStartHooks,
    /// Storage options for persisted types. Unset until applied.
    pub storage: Option<StorageOptions>,
}

impl SharedServerConfig {
    pub fn new(listener: ListenerConfig) -> Self {
        Self {
            listener,
            post_start_hooks: PostStartHooks::new(),
            storage: None,
        }
    }

    /// A copy without the caller's hooks or storage options.
    ///
    /// Disabled hook names carry over.
    pub fn working_copy(&self) -> Self {
        let mut hooks = PostStartHooks::new();
        for name in self.post_start_hooks.disabled() {
            hooks.disable(name.clone());
        }
        Self {
            listener: self.listener.clone(),
            post_start_hooks: hooks,
            storage: None,
        }
    }
}

impl StorageOptions {
    /// Validate and install these options on `shared`.
    pub fn apply_to(self, shared: &mut SharedServerConfig) -> Result<(), ConfigurationError> {
        if !self.prefix.starts_with('/') {
            return Err(ConfigurationError::Storage(format!(
                "storage prefix {:?} must start with '/'",
                self.prefix
            )));
        }
        if self.encode_version(REGISTRATION_GROUP).is_none() {
            return Err(ConfigurationError::Storage(format!(
                "no encode version for {}",
                REGISTRATION_GROUP
            )));
        }
        shared.storage = Some(self);
        Ok(())
    }
}

/// Configuration of the aggregation layer, ready to build a server from.
pub struct CompletedConfig {
    pub shared: SharedServerConfig,
    pub settings: AggregatorConfig,
    pub storage: StorageOptions,
    pub name_mappings: Arc<NameMappings>,
    pub resolver: ExternalNameResolver,
    pub transport: ProxyTransport,
    mapping_file: Option<PathBuf>,
}

/// Assemble the aggregation layer's configuration.
///
/// `settings` is validated here as well as by the loader, since embedders may build it in code.
pub fn create_aggregator_config(
    shared: &SharedServerConfig,
    settings: &AggregatorConfig,
) -> Result<CompletedConfig, ConfigurationError> {
    validate_config(settings).map_err(ConfigError::Validation)?;
    let mut working = shared.working_copy();

    StorageOptions::for_aggregator(&settings.registry).apply_to(&mut working)?;
    let storage = working
        .storage
        .clone()
        .ok_or_else(|| ConfigurationError::Storage("storage options were not applied".into()))?;

    let name_mappings = Arc::new(NameMappings::new(settings.name_mappings.mappings.clone()));
    let mapping_file = settings.name_mappings.path.clone();
    if let Some(path) = &mapping_file {
        let count = NameMappingWatcher::new(
            path,
            settings.name_mappings.mappings.clone(),
            name_mappings.clone(),
        )
        .reload()?;
        tracing::info!(path = ?path, mappings = count, "Name mappings loaded");
    }
    let resolver = ExternalNameResolver::new(name_mappings.clone());

    let transport = ProxyTransportBuilder::new(settings.transport.clone()).build()?;

    tracing::info!(
        storage_prefix = %storage.prefix,
        name_mappings = name_mappings.len(),
        skip_hostname_verification = transport.skips_hostname_verification(),
        "Aggregator configuration assembled"
    );

    Ok(CompletedConfig {
        shared: working,
        settings: settings.clone(),
        storage,
        name_mappings,
        resolver,
        transport,
        mapping_file,
    })
}

/// The assembled aggregation server, not yet serving.
pub struct AggregatorServer {
    listener: ListenerConfig,
    settings: AggregatorConfig,
    storage: StorageOptions,
    store: Arc<dyn RegistryStore>,
    gate: Arc<ConvergenceGate>,
    client: Arc<PriorityRegistryClient>,
    health: Arc<HealthChecks>,
    resolver: ExternalNameResolver,
    transport: ProxyTransport,
    hooks: PostStartHooks,
    shutdown: Shutdown,
}

/// Build the aggregation server once the delegate is known.
pub fn create_aggregator_server(
    config: CompletedConfig,
    delegate: &dyn DelegationTarget,
    store: Arc<dyn RegistryStore>,
    shutdown: Shutdown,
) -> Result<AggregatorServer, BootstrapError> {
    let CompletedConfig {
        shared,
        settings,
        storage,
        name_mappings,
        resolver,
        transport,
        mapping_file,
    } = config;

    let priorities = PriorityTable::builtin().with_overrides(settings.priorities.iter().map(|p| {
        (
            GroupVersion::new(p.group.clone(), p.version.clone()),
            Priority::new(p.group_priority, p.version_priority),
        )
    }));

    let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
    let client = Arc::new(PriorityRegistryClient::new(store.clone(), gate.clone()));

    let derived = derive_backends(
        delegate,
        &priorities,
        client.as_ref(),
        settings.discovery.unknown_identity_policy,
    );
    client.set_unknown(derived.unknown);

    for backend in &settings.backends {
        client.add_external(BackendDescriptor::external(
            GroupVersion::new(backend.group.clone(), backend.version.clone()),
            Priority::new(backend.group_priority, backend.version_priority),
            ServiceReference {
                name: backend.service.clone(),
            },
        ));
    }

    let report = client.sync_on_start();
    for (identity, error) in &report.failed {
        tracing::warn!(identity = %identity, error = %error, "Backend left for the sync loop to retry");
    }

    gate.seal();
    metrics::record_pending_backends(gate.name(), gate.pending_count());

    let health = Arc::new(HealthChecks::new());
    health.add_boot_sequence_checks([gate.clone() as Arc<dyn HealthCheck>])?;
    health.add_readiness_checks([shutdown_check(shutdown.clone())])?;

    let mut hooks = shared.post_start_hooks;
    add_background_hooks(
        &mut hooks,
        &settings,
        &store,
        &gate,
        &client,
        &resolver,
        &transport,
    )?;
    if let Some(path) = mapping_file {
        let watcher = NameMappingWatcher::new(&path, settings.name_mappings.mappings.clone(), name_mappings);
        hooks.add(NAME_MAPPING_WATCH_HOOK, move |mut ctx| {
            let handle = watcher.run().map_err(|e| HookError::Failed {
                name: NAME_MAPPING_WATCH_HOOK.to_string(),
                reason: e.to_string(),
            })?;
            tokio::spawn(async move {
                // Dropping the handle stops the watch.
                let _handle = handle;
                let _ = ctx.shutdown.recv().await;
            });
            Ok(())
        })?;
    }

    tracing::info!(
        pending = gate.pending_count(),
        registered = report.registered.len(),
        failed = report.failed.len(),
        hooks = ?hooks.names(),
        "Aggregation server assembled"
    );

    Ok(AggregatorServer {
        listener: shared.listener,
        settings,
        storage,
        store,
        gate,
        client,
        health,
        resolver,
        transport,
        hooks,
        shutdown,
    })
}

fn add_background_hooks(
    hooks: &mut PostStartHooks,
    settings: &AggregatorConfig,
    store: &Arc<dyn RegistryStore>,
    gate: &Arc<ConvergenceGate>,
    client: &Arc<PriorityRegistryClient>,
    resolver: &ExternalNameResolver,
    transport: &ProxyTransport,
) -> Result<(), HookError> {
    let sync_client = client.clone();
    let sync_interval = Duration::from_secs(settings.registry.sync_interval_secs);
    let policy = settings.discovery.unknown_identity_policy;
    let remind_every = Duration::from_secs(settings.discovery.remind_interval_secs);
    hooks.add(REGISTRATION_SYNC_HOOK, move |ctx| {
        tokio::spawn(sync_client.run(sync_interval, policy, remind_every, ctx.shutdown));
        Ok(())
    })?;

    let listener = StatusListener::new(gate.clone(), store.clone());
    hooks.add(STATUS_LISTENER_HOOK, move |ctx| {
        tokio::spawn(listener.run(ctx.shutdown));
        Ok(())
    })?;

    let controller = AvailabilityController::new(
        store.clone(),
        resolver.clone(),
        transport.clone(),
        settings.availability.clone(),
    );
    hooks.add(AVAILABILITY_HOOK, move |ctx| {
        tokio::spawn(controller.run(ctx.shutdown));
        Ok(())
    })?;

    Ok(())
}

impl AggregatorServer {
    pub fn gate(&self) -> &Arc<ConvergenceGate> {
        &self.gate
    }

    pub fn health(&self) -> &Arc<HealthChecks> {
        &self.health
    }

    pub fn client(&self) -> &Arc<PriorityRegistryClient> {
        &self.client
    }

    /// Serve on `listener` until shutdown. Post-start hooks run once serving begins.
    pub async fn run(self, listener: TcpListener) -> Result<(), BootstrapError> {
        let server = HttpServer::new(
            &self.listener,
            self.health,
            self.store,
            self.storage,
            self.resolver,
            self.transport,
            self.settings.delegate.address.clone(),
        );

        // The listener is bound; connections queue until the server accepts them.
        let ran = self.hooks.run_all(&self.shutdown)?;
        tracing::info!(hooks = ?ran, "Post-start hooks started");

        server.run(listener, self.listener.tls.clone(), self.shutdown).await?;
        Ok(())
    }
}
