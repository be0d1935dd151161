//! Priority registry client.
//!
//! # Responsibilities
//! - Keep the sync-on-start list of descriptors
//! - Submit descriptors to the registry store (best-effort fan-out)
//! - Mark auto-registered identities pending in the convergence gate after a successful submit
//! - Periodically re-submit the list once the server is serving
//!
//! # Design Decisions
//! - One failing submission never aborts its siblings
//! - An identity is marked pending only after its submit succeeded
//! - Externally owned backends are kept registered but never gate readiness
//! - No retries inside a pass; the next sync pass is the only repeat

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::UnknownIdentityPolicy;
use crate::discovery::priority::GroupVersion;
use crate::health::gate::ConvergenceGate;
use crate::observability::metrics;
use crate::registry::{BackendDescriptor, RegistrationError, RegistryStore, SyncOnStart, UpsertOutcome};

#[derive(Debug, Clone)]
struct SyncEntry {
    descriptor: BackendDescriptor,
    /// Auto-registered from the delegate; gates readiness.
    gated: bool,
}

/// Result of one sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Identities submitted successfully, in list order.
    pub registered: Vec<GroupVersion>,
    /// Identities newly marked pending in the gate.
    pub pending: Vec<GroupVersion>,
    /// Submissions that failed.
    pub failed: Vec<(GroupVersion, RegistrationError)>,
}

/// Submits backend descriptors to the registry store.
pub struct PriorityRegistryClient {
    store: Arc<dyn RegistryStore>,
    gate: Arc<ConvergenceGate>,
    entries: Mutex<Vec<SyncEntry>>,
    unknown: Mutex<Vec<GroupVersion>>,
    reminder_passes: AtomicU64,
}

impl PriorityRegistryClient {
    pub fn new(store: Arc<dyn RegistryStore>, gate: Arc<ConvergenceGate>) -> Self {
        Self {
            store,
            gate,
            entries: Mutex::new(Vec::new()),
            unknown: Mutex::new(Vec::new()),
            reminder_passes: AtomicU64::new(0),
        }
    }

    /// Keep an externally owned backend registered. It does not gate readiness.
    pub fn add_external(&self, descriptor: BackendDescriptor) {
        self.push(descriptor, false);
    }

    /// Remember identities skipped for lack of a priority, for reminders.
    pub fn set_unknown(&self, identities: Vec<GroupVersion>) {
        *self.unknown.lock().unwrap_or_else(PoisonError::into_inner) = identities;
    }

    /// Identities currently skipped for lack of a priority.
    pub fn unknown(&self) -> Vec<GroupVersion> {
        self.unknown.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of reminder passes run by the sync loop.
    pub fn reminder_passes(&self) -> u64 {
        self.reminder_passes.load(Ordering::Relaxed)
    }

    fn push(&self, descriptor: BackendDescriptor, gated: bool) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| e.descriptor.identity() == descriptor.identity()) {
            tracing::debug!(identity = %descriptor.identity(), "Descriptor already in sync list");
            return;
        }
        entries.push(SyncEntry { descriptor, gated });
    }

    fn snapshot(&self) -> Vec<SyncEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of descriptors kept in sync.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submit one descriptor for persistent registration.
    pub fn submit(&self, descriptor: &BackendDescriptor) -> Result<UpsertOutcome, RegistrationError> {
        match self.store.upsert(descriptor) {
            Ok(outcome) => {
                let label = match outcome {
                    UpsertOutcome::Created => "created",
                    UpsertOutcome::Unchanged => "unchanged",
                };
                metrics::record_registration(label);
                tracing::debug!(
                    identity = %descriptor.identity(),
                    group_priority = descriptor.priority().group,
                    version_priority = descriptor.priority().version,
                    outcome = label,
                    "Backend submitted"
                );
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_registration("failed");
                tracing::warn!(identity = %descriptor.identity(), error = %e, "Backend registration failed");
                Err(e)
            }
        }
    }

    /// Insert an identity into the convergence gate's pending set.
    pub fn mark_pending_convergence(&self, identity: &GroupVersion) -> bool {
        self.gate.seed(std::iter::once(identity.clone())) == 1
    }

    /// Submit the whole sync-on-start list, marking successful auto-registrations pending.
    pub fn sync_on_start(&self) -> SyncReport {
        let mut report = SyncReport::default();

        for entry in self.snapshot() {
            let identity = entry.descriptor.identity().clone();
            match self.submit(&entry.descriptor) {
                Ok(_) => {
                    if entry.gated && self.mark_pending_convergence(&identity) {
                        report.pending.push(identity.clone());
                    }
                    report.registered.push(identity);
                }
                Err(e) => report.failed.push((identity, e)),
            }
        }

        tracing::info!(
            registered = report.registered.len(),
            pending = report.pending.len(),
            failed = report.failed.len(),
            "Sync-on-start pass complete"
        );
        report
    }

    /// Re-submit the sync list every `interval` until shutdown.
    ///
    /// Under `UnknownIdentityPolicy::Remind`, also re-logs skipped identities every `remind_every`.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        policy: UnknownIdentityPolicy,
        remind_every: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "Registration sync loop starting");

        let mut sync_ticker = time::interval(interval);
        sync_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; bootstrap already ran a pass.
        sync_ticker.tick().await;

        let mut remind_ticker = match policy {
            UnknownIdentityPolicy::Remind => {
                let mut ticker = time::interval(remind_every);
                ticker.tick().await;
                Some(ticker)
            }
            _ => None,
        };

        loop {
            tokio::select! {
                _ = sync_ticker.tick() => {
                    self.resync();
                }
                _ = next_reminder(&mut remind_ticker) => {
                    self.remind_unknown();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registration sync loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn resync(&self) {
        for entry in self.snapshot() {
            if let Ok(UpsertOutcome::Created) = self.submit(&entry.descriptor) {
                tracing::info!(identity = %entry.descriptor.identity(), "Restored missing registration");
            }
        }
    }

    /// Log every skipped identity again. Returns the identities logged.
    fn remind_unknown(&self) -> Vec<GroupVersion> {
        let unknown = self.unknown();
        for identity in &unknown {
            tracing::info!(identity = %identity, "Backend still skipped: no priority entry");
        }
        self.reminder_passes.fetch_add(1, Ordering::Relaxed);
        unknown
    }
}

/// Next reminder tick, or never when reminders are off.
async fn next_reminder(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SyncOnStart for PriorityRegistryClient {
    fn add_to_sync_on_start(&self, descriptor: BackendDescriptor) {
        self.push(descriptor, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::discovery::priority::Priority;
    use crate::health::gate::GATE_CHECK_NAME;
    use crate::registry::store::{MemoryRegistry, StorageOptions};
    use crate::registry::{Registration, ServiceReference, StatusEvent};

    /// Store that refuses one identity and delegates the rest.
    struct FlakyStore {
        inner: MemoryRegistry,
        refuse: GroupVersion,
    }

    impl RegistryStore for FlakyStore {
        fn upsert(&self, descriptor: &BackendDescriptor) -> Result<UpsertOutcome, RegistrationError> {
            if descriptor.identity() == &self.refuse {
                return Err(RegistrationError::Unavailable("storage offline".into()));
            }
            self.inner.upsert(descriptor)
        }

        fn get(&self, identity: &GroupVersion) -> Option<Registration> {
            self.inner.get(identity)
        }

        fn list(&self) -> Vec<Registration> {
            self.inner.list()
        }

        fn set_available(
            &self,
            identity: &GroupVersion,
            available: bool,
            message: Option<String>,
        ) -> Result<(), RegistrationError> {
            self.inner.set_available(identity, available, message)
        }

        fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
            self.inner.subscribe()
        }
    }

    fn memory() -> MemoryRegistry {
        MemoryRegistry::new(StorageOptions::for_aggregator(&RegistryConfig::default()))
    }

    fn local(group: &str) -> BackendDescriptor {
        BackendDescriptor::local(GroupVersion::new(group, "v1"), Priority::new(100, 9))
    }

    #[test]
    fn failed_submit_does_not_abort_siblings() {
        let store = Arc::new(FlakyStore {
            inner: memory(),
            refuse: GroupVersion::new("g2", "v1"),
        });
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let client = PriorityRegistryClient::new(store.clone(), gate.clone());

        for group in ["g1", "g2", "g3"] {
            client.add_to_sync_on_start(local(group));
        }
        let report = client.sync_on_start();

        assert_eq!(report.registered, vec![GroupVersion::new("g1", "v1"), GroupVersion::new("g3", "v1")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, GroupVersion::new("g2", "v1"));

        // Only successfully submitted identities are pending.
        let pending = gate.probe().unwrap_err().pending;
        assert_eq!(pending, report.registered);
        assert!(store.get(&GroupVersion::new("g2", "v1")).is_none());
    }

    #[test]
    fn external_backends_do_not_gate_readiness() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let client = PriorityRegistryClient::new(Arc::new(memory()), gate.clone());

        client.add_external(BackendDescriptor::external(
            GroupVersion::new("ext", "v1"),
            Priority::new(1000, 9),
            ServiceReference { name: "ext-svc".into() },
        ));
        let report = client.sync_on_start();

        assert_eq!(report.registered.len(), 1);
        assert!(report.pending.is_empty());
        assert!(gate.probe().is_ok());
    }

    #[test]
    fn resubmission_is_tolerated() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let store = Arc::new(memory());
        let client = PriorityRegistryClient::new(store.clone(), gate);

        client.add_to_sync_on_start(local("g1"));
        client.add_to_sync_on_start(local("g1"));
        assert_eq!(client.len(), 1);

        assert!(client.sync_on_start().failed.is_empty());
        assert!(client.sync_on_start().failed.is_empty());
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn sync_loop_restores_removed_registrations() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let store = Arc::new(memory());
        let client = Arc::new(PriorityRegistryClient::new(store.clone(), gate));
        client.add_to_sync_on_start(local("g1"));
        client.sync_on_start();

        store.remove(&GroupVersion::new("g1", "v1"));

        let shutdown = crate::lifecycle::Shutdown::new();
        let handle = tokio::spawn(client.clone().run(
            Duration::from_millis(20),
            UnknownIdentityPolicy::Remind,
            Duration::from_millis(20),
            shutdown.subscribe(),
        ));

        time::timeout(Duration::from_secs(2), async {
            while store.get(&GroupVersion::new("g1", "v1")).is_none() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registration should be restored");

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn remind_policy_repeats_skipped_identities() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let client = Arc::new(PriorityRegistryClient::new(Arc::new(memory()), gate));
        let skipped = vec![GroupVersion::new("unknown", "v9"), GroupVersion::new("other", "v1")];
        client.set_unknown(skipped.clone());

        let shutdown = crate::lifecycle::Shutdown::new();
        let handle = tokio::spawn(client.clone().run(
            Duration::from_secs(60),
            UnknownIdentityPolicy::Remind,
            Duration::from_millis(20),
            shutdown.subscribe(),
        ));

        time::timeout(Duration::from_secs(2), async {
            while client.reminder_passes() < 2 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reminders should repeat");

        assert_eq!(client.remind_unknown(), skipped);
        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn log_policy_never_reminds() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let client = Arc::new(PriorityRegistryClient::new(Arc::new(memory()), gate));
        client.set_unknown(vec![GroupVersion::new("unknown", "v9")]);

        let shutdown = crate::lifecycle::Shutdown::new();
        let handle = tokio::spawn(client.clone().run(
            Duration::from_secs(60),
            UnknownIdentityPolicy::Log,
            Duration::from_millis(10),
            shutdown.subscribe(),
        ));

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.reminder_passes(), 0);
        assert_eq!(client.unknown().len(), 1);

        shutdown.trigger();
        handle.await.unwrap();
    }
}
