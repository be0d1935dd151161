//! Status-change listener feeding the convergence gate.
//!
//! # Responsibilities
//! - Subscribe to the registry's status feed
//! - Replay current state once on start, and again after falling behind
//! - Dispatch each event into the gate, one at a time
//!
//! # Design Decisions
//! - Subscribe before listing, so no event between the two is lost
//! - Lag is recovered by re-listing rather than by queueing
//! - Exits on shutdown or when the feed closes

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::health::gate::ConvergenceGate;
use crate::observability::metrics;
use crate::registry::{RegistryStore, StatusEvent};

/// Single consumer of the status feed for one gate.
pub struct StatusListener {
    gate: Arc<ConvergenceGate>,
    store: Arc<dyn RegistryStore>,
}

impl StatusListener {
    pub fn new(gate: Arc<ConvergenceGate>, store: Arc<dyn RegistryStore>) -> Self {
        Self { gate, store }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut events = self.store.subscribe();
        self.resync();
        tracing::info!(gate = %self.gate.name(), "Status listener started");

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.dispatch(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Status listener lagged, re-listing registrations");
                        self.resync();
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Status feed closed, listener exiting");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Status listener received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, event: &StatusEvent) {
        metrics::record_status_event(event.available);
        self.gate.on_status_event(event);
    }

    fn resync(&self) {
        for registration in self.store.list() {
            self.dispatch(&StatusEvent {
                identity: registration.descriptor.identity().clone(),
                available: registration.available,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::discovery::priority::{GroupVersion, Priority};
    use crate::health::gate::GATE_CHECK_NAME;
    use crate::lifecycle::Shutdown;
    use crate::registry::store::{MemoryRegistry, StorageOptions};
    use crate::registry::BackendDescriptor;
    use std::time::Duration;

    async fn wait_converged(gate: &ConvergenceGate) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while gate.probe().is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("gate should converge");
    }

    fn setup() -> (Arc<ConvergenceGate>, Arc<MemoryRegistry>, GroupVersion) {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let store = Arc::new(MemoryRegistry::new(StorageOptions::for_aggregator(
            &RegistryConfig::default(),
        )));
        let gv = GroupVersion::new("g1", "v1");
        store
            .upsert(&BackendDescriptor::local(gv.clone(), Priority::new(100, 9)))
            .unwrap();
        gate.seed(vec![gv.clone()]);
        gate.seal();
        (gate, store, gv)
    }

    #[tokio::test]
    async fn converges_on_available_event() {
        let (gate, store, gv) = setup();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(
            StatusListener::new(gate.clone(), store.clone()).run(shutdown.subscribe()),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.probe().is_err());

        store.set_available(&gv, true, None).unwrap();
        wait_converged(&gate).await;

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn replays_state_observed_before_start() {
        let (gate, store, gv) = setup();
        store.set_available(&gv, true, None).unwrap();

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(
            StatusListener::new(gate.clone(), store.clone()).run(shutdown.subscribe()),
        );
        wait_converged(&gate).await;

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (gate, store, _) = setup();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(StatusListener::new(gate, store).run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
