//! Startup convergence gate.
//!
//! Tracks auto-registered backends that have not yet been observed available.
//! The gate reports healthy only once every seeded identity has been seen
//! available at least once.
//!
//! # States
//! ```text
//! Pending → Converged   (on the first available=true event; terminal)
//! ```
//!
//! # Design Decisions
//! - One reader/writer lock guards membership and nothing else
//! - Seeding happens during bootstrap; `seal` closes the window before the
//!   probe is exposed, after which the set only shrinks
//! - Unavailable events are ignored: this is a one-time latch, not a liveness tracker
//! - `probe` is a snapshot read and never waits

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use axum::http::request::Parts;
use thiserror::Error;

use crate::discovery::priority::GroupVersion;
use crate::health::checks::{CheckError, HealthCheck};
use crate::observability::metrics;
use crate::registry::StatusEvent;

/// Name of the boot-sequence check backed by the gate.
pub const GATE_CHECK_NAME: &str = "autoregister-completion";

/// Backends still awaiting their first available observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing backend: [{}]", join_identities(.pending))]
pub struct PendingBackendsError {
    /// Pending identities in lexicographic order.
    pub pending: Vec<GroupVersion>,
}

fn join_identities(identities: &[GroupVersion]) -> String {
    identities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convergence latch over a set of backend identities.
#[derive(Debug)]
pub struct ConvergenceGate {
    name: String,
    pending: RwLock<BTreeSet<GroupVersion>>,
    sealed: AtomicBool,
}

impl ConvergenceGate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: RwLock::new(BTreeSet::new()),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add identities to the pending set. Returns how many were newly added.
    ///
    /// Ignored once the gate is sealed.
    pub fn seed<I>(&self, identities: I) -> usize
    where
        I: IntoIterator<Item = GroupVersion>,
    {
        if self.is_sealed() {
            tracing::warn!(gate = %self.name, "Ignoring seed after the gate was sealed");
            return 0;
        }

        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        let added = identities
            .into_iter()
            .filter(|identity| pending.insert(identity.clone()))
            .count();
        metrics::record_pending_backends(&self.name, pending.len());
        added
    }

    /// Close the seeding window. Called before the probe is registered.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Apply a status event. Returns true if this event converged an identity.
    pub fn on_status_event(&self, event: &StatusEvent) -> bool {
        if !event.available {
            return false;
        }

        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if !pending.remove(&event.identity) {
            return false;
        }

        let remaining = pending.len();
        drop(pending);

        metrics::record_pending_backends(&self.name, remaining);
        tracing::info!(
            gate = %self.name,
            identity = %event.identity,
            remaining,
            "Backend observed available"
        );
        if remaining == 0 {
            tracing::info!(gate = %self.name, "All auto-registered backends converged");
        }
        true
    }

    /// Snapshot check: succeeds once nothing is pending.
    pub fn probe(&self) -> Result<(), PendingBackendsError> {
        let pending = self.pending.read().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            Ok(())
        } else {
            Err(PendingBackendsError {
                pending: pending.iter().cloned().collect(),
            })
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl HealthCheck for ConvergenceGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _request: &Parts) -> Result<(), CheckError> {
        self.probe().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn gv(group: &str) -> GroupVersion {
        GroupVersion::new(group, "v1")
    }

    fn available(group: &str) -> StatusEvent {
        StatusEvent { identity: gv(group), available: true }
    }

    fn unavailable(group: &str) -> StatusEvent {
        StatusEvent { identity: gv(group), available: false }
    }

    #[test]
    fn empty_gate_is_converged() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        assert!(gate.probe().is_ok());
    }

    #[test]
    fn probe_lists_pending_in_order() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        gate.seed(vec![gv("g2"), gv("g1"), GroupVersion::core_v1()]);

        let err = gate.probe().unwrap_err();
        assert_eq!(err.pending, vec![GroupVersion::core_v1(), gv("g1"), gv("g2")]);
        assert_eq!(err.to_string(), "missing backend: [v1, g1/v1, g2/v1]");

        gate.on_status_event(&available("g1"));
        assert_eq!(gate.probe().unwrap_err().to_string(), "missing backend: [v1, g2/v1]");
    }

    #[test]
    fn converged_identity_stays_converged() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        gate.seed(vec![gv("g1")]);
        gate.seal();

        assert!(gate.on_status_event(&available("g1")));
        assert!(gate.probe().is_ok());

        assert!(!gate.on_status_event(&unavailable("g1")));
        assert!(gate.probe().is_ok());
    }

    #[test]
    fn unavailable_events_leave_pending() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        gate.seed(vec![gv("g1")]);

        assert!(!gate.on_status_event(&unavailable("g1")));
        assert_eq!(gate.pending_count(), 1);
    }

    #[test]
    fn duplicate_events_are_noops() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        gate.seed(vec![gv("g1"), gv("g2")]);

        assert!(gate.on_status_event(&available("g1")));
        assert!(!gate.on_status_event(&available("g1")));
        assert_eq!(gate.pending_count(), 1);
    }

    #[test]
    fn events_for_unseeded_identities_are_ignored() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        gate.seed(vec![gv("g1")]);

        assert!(!gate.on_status_event(&available("other")));
        assert_eq!(gate.pending_count(), 1);
    }

    #[test]
    fn sealed_gate_never_regrows() {
        let gate = ConvergenceGate::new(GATE_CHECK_NAME);
        assert_eq!(gate.seed(vec![gv("g1"), gv("g1")]), 1);
        gate.seal();

        assert_eq!(gate.seed(vec![gv("g2")]), 0);
        gate.on_status_event(&available("g1"));
        assert_eq!(gate.seed(vec![gv("g1")]), 0);
        assert!(gate.probe().is_ok());
    }

    #[test]
    fn convergence_is_order_independent() {
        let ids = ["a", "b", "c"];
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for seed_order in orders {
            for event_order in orders {
                let gate = ConvergenceGate::new(GATE_CHECK_NAME);
                gate.seed(seed_order.iter().map(|&i| gv(ids[i])));
                gate.seal();
                for &i in &event_order {
                    assert!(gate.probe().is_err());
                    gate.on_status_event(&available(ids[i]));
                }
                assert!(gate.probe().is_ok());
            }
        }
    }

    #[test]
    fn concurrent_probes_see_consistent_snapshots() {
        let gate = Arc::new(ConvergenceGate::new(GATE_CHECK_NAME));
        let ids: Vec<GroupVersion> = (0..64).map(|i| gv(&format!("g{:02}", i))).collect();
        gate.seed(ids.clone());
        gate.seal();

        let writer = {
            let gate = Arc::clone(&gate);
            let ids = ids.clone();
            thread::spawn(move || {
                // Converge in order so every snapshot must be a suffix of `ids`.
                for id in ids {
                    gate.on_status_event(&StatusEvent { identity: id.clone(), available: false });
                    gate.on_status_event(&StatusEvent { identity: id, available: true });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let ids = ids.clone();
                thread::spawn(move || {
                    let mut last = usize::MAX;
                    loop {
                        match gate.probe() {
                            Ok(()) => break,
                            Err(err) => {
                                let n = err.pending.len();
                                assert!(n <= last, "pending set grew from {} to {}", last, n);
                                assert_eq!(err.pending, ids[ids.len() - n..].to_vec());
                                last = n;
                            }
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(gate.probe().is_ok());
    }
}
