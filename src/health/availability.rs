//! Backend availability controller.
//!
//! # Responsibilities
//! - Periodically evaluate every registration
//! - Local backends (served by the delegate) are available
//! - External backends are resolved by name and probed over the proxy transport
//! - Write the observed condition back to the registry store
//!
//! # Design Decisions
//! - Reports observed state only; no retry or backoff
//! - One slow backend does not delay the others within a pass
//! - Writes only when the condition or message changed
//! - Probes share the forwarding transport so TLS policy matches real traffic

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::AvailabilityConfig;
use crate::net::{backend_url, ExternalNameResolver, ProxyTransport};
use crate::observability::metrics;
use crate::registry::{BackendDescriptor, Registration, RegistryStore, ServiceReference};

/// Observed availability of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub message: Option<String>,
}

impl Availability {
    fn available() -> Self {
        Self {
            available: true,
            message: None,
        }
    }

    fn unavailable(message: String) -> Self {
        Self {
            available: false,
            message: Some(message),
        }
    }
}

pub struct AvailabilityController {
    store: Arc<dyn RegistryStore>,
    resolver: ExternalNameResolver,
    transport: ProxyTransport,
    config: AvailabilityConfig,
}

impl AvailabilityController {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        resolver: ExternalNameResolver,
        transport: ProxyTransport,
        config: AvailabilityConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            transport,
            config,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Availability controller disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Availability controller starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Availability controller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Evaluate every registration once. Probes run concurrently.
    pub async fn check_all(&self) {
        let registrations = self.store.list();
        let observed = join_all(registrations.iter().map(|r| self.check(&r.descriptor))).await;
        for (registration, observed) in registrations.iter().zip(observed) {
            self.record(registration, observed);
        }
    }

    /// Evaluate one backend.
    pub async fn check(&self, descriptor: &BackendDescriptor) -> Availability {
        match descriptor.service() {
            None => Availability::available(),
            Some(service) => self.probe(descriptor, service).await,
        }
    }

    async fn probe(&self, descriptor: &BackendDescriptor, service: &ServiceReference) -> Availability {
        let base = match self.resolver.resolve(&service.name) {
            Ok(base) => base,
            Err(e) => return Availability::unavailable(e.to_string()),
        };
        let url = match backend_url(&base, &descriptor.identity().path_prefix()) {
            Ok(url) => url,
            Err(e) => return Availability::unavailable(format!("invalid backend address {}: {}", base, e)),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let request = self
            .transport
            .client()
            .get(url.clone())
            .header("user-agent", "api-aggregator-availability")
            .timeout(timeout)
            .send();

        match request.await {
            Ok(response) if response.status().is_success() => Availability::available(),
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "Availability probe failed: non-success status");
                Availability::unavailable(format!("failing response from {}: {}", url, response.status()))
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(url = %url, "Availability probe failed: timeout");
                Availability::unavailable(format!("no response from {} within {:?}", url, timeout))
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Availability probe failed: connection error");
                Availability::unavailable(format!("failing or missing response from {}: {}", url, e))
            }
        }
    }

    fn record(&self, registration: &Registration, observed: Availability) {
        let identity = registration.descriptor.identity();
        metrics::record_backend_available(&identity.to_string(), observed.available);

        if registration.available == observed.available && registration.message == observed.message {
            return;
        }
        if let Err(e) = self
            .store
            .set_available(identity, observed.available, observed.message)
        {
            tracing::warn!(identity = %identity, error = %e, "Failed to record backend availability");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NameMapping, RegistryConfig};
    use crate::discovery::priority::{GroupVersion, Priority};
    use crate::net::NameMappings;
    use crate::registry::store::{MemoryRegistry, StorageOptions};

    fn controller(store: Arc<MemoryRegistry>, mappings: Vec<NameMapping>) -> AvailabilityController {
        AvailabilityController::new(
            store,
            ExternalNameResolver::new(Arc::new(NameMappings::new(mappings))),
            ProxyTransport::with_defaults().unwrap(),
            AvailabilityConfig {
                enabled: true,
                interval_secs: 1,
                timeout_secs: 1,
            },
        )
    }

    fn store() -> Arc<MemoryRegistry> {
        Arc::new(MemoryRegistry::new(StorageOptions::for_aggregator(&RegistryConfig::default())))
    }

    #[tokio::test]
    async fn local_backends_are_available() {
        let store = store();
        let gv = GroupVersion::new("g1", "v1");
        store
            .upsert(&BackendDescriptor::local(gv.clone(), Priority::new(100, 9)))
            .unwrap();

        controller(store.clone(), Vec::new()).check_all().await;

        assert!(store.get(&gv).unwrap().available);
    }

    #[tokio::test]
    async fn unresolvable_service_is_unavailable() {
        let store = store();
        let gv = GroupVersion::new("ext", "v1");
        store
            .upsert(&BackendDescriptor::external(
                gv.clone(),
                Priority::new(100, 9),
                ServiceReference { name: "missing-svc".into() },
            ))
            .unwrap();

        controller(store.clone(), Vec::new()).check_all().await;

        let registration = store.get(&gv).unwrap();
        assert!(!registration.available);
        assert_eq!(
            registration.message.as_deref(),
            Some("no address mapping for service \"missing-svc\"")
        );
    }

    #[tokio::test]
    async fn unchanged_condition_is_not_rewritten() {
        let store = store();
        let gv = GroupVersion::new("g1", "v1");
        store
            .upsert(&BackendDescriptor::local(gv.clone(), Priority::new(100, 9)))
            .unwrap();
        let controller = controller(store.clone(), Vec::new());

        controller.check_all().await;
        let mut events = store.subscribe();
        controller.check_all().await;

        assert!(events.try_recv().is_err());
    }
}
