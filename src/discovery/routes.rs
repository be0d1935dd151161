//! Backend derivation from the delegate's listed routes.
//!
//! # Responsibilities
//! - Map `/api/v1` and `/apis/{group}/{version}` prefixes to identities
//! - Attach priorities from the priority table
//! - Hand each descriptor to the sync-on-start sink as it is produced
//!
//! # Design Decisions
//! - Output follows route order, not priority order
//! - Malformed or nested paths are skipped silently
//! - Unknown identities are skipped; reporting follows `UnknownIdentityPolicy`
//! - One sink call per descriptor so earlier submissions survive a later panic

use crate::config::UnknownIdentityPolicy;
use crate::discovery::priority::{GroupVersion, PriorityTable};
use crate::discovery::DelegationTarget;
use crate::registry::{BackendDescriptor, SyncOnStart};

/// Prefix of the legacy core API.
pub const CORE_API_PREFIX: &str = "/api/v1";

/// Prefix of every named API group.
pub const GROUP_API_PREFIX: &str = "/apis/";

/// Result of a derivation pass.
#[derive(Debug, Default)]
pub struct DerivedBackends {
    /// Descriptors in route order.
    pub descriptors: Vec<BackendDescriptor>,
    /// Well-formed identities with no priority entry.
    pub unknown: Vec<GroupVersion>,
}

/// Parse a listed path into an identity, if it names exactly one group/version.
pub fn identity_from_path(path: &str) -> Option<GroupVersion> {
    if path == CORE_API_PREFIX {
        return Some(GroupVersion::core_v1());
    }
    if !path.starts_with(GROUP_API_PREFIX) {
        return None;
    }

    // "/apis/rbac.authorization.k8s.io/v1" → ["", "apis", group, version]
    let tokens: Vec<&str> = path.split('/').collect();
    if tokens.len() != 4 {
        return None;
    }
    let (group, version) = (tokens[2], tokens[3]);
    if group.is_empty() || version.is_empty() {
        return None;
    }
    Some(GroupVersion::new(group, version))
}

/// Derive backend descriptors from the delegate's listed paths.
pub fn derive_backends(
    delegate: &dyn DelegationTarget,
    priorities: &PriorityTable,
    sink: &dyn SyncOnStart,
    policy: UnknownIdentityPolicy,
) -> DerivedBackends {
    let mut derived = DerivedBackends::default();

    for path in delegate.listed_paths() {
        let Some(identity) = identity_from_path(&path) else {
            tracing::trace!(path = %path, "Listed path does not name a group version");
            continue;
        };

        let Some(priority) = priorities.get(&identity) else {
            // Registering without a priority could leave the identity stuck in the sync list.
            match policy {
                UnknownIdentityPolicy::Silent => {
                    tracing::debug!(identity = %identity, "Skipping backend without priority entry");
                }
                UnknownIdentityPolicy::Log | UnknownIdentityPolicy::Remind => {
                    tracing::info!(identity = %identity, "Skipping backend without priority entry");
                }
            }
            if !derived.unknown.contains(&identity) {
                derived.unknown.push(identity);
            }
            continue;
        };

        if derived.descriptors.iter().any(|d| d.identity() == &identity) {
            continue;
        }

        let descriptor = BackendDescriptor::local(identity, priority);
        sink.add_to_sync_on_start(descriptor.clone());
        derived.descriptors.push(descriptor);
    }

    tracing::info!(
        derived = derived.descriptors.len(),
        unknown = derived.unknown.len(),
        "Derived backends from delegate routes"
    );
    derived
}
