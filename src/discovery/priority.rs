//! Group/version identities and their discovery priorities.
//!
//! # Responsibilities
//! - Name an aggregated API surface by `(group, version)`
//! - Hold the static priority table consulted during registration
//! - Produce the discovery ordering (group priority first, then version)
//!
//! # Design Decisions
//! - Built once at startup and shared by reference, never through a global
//! - Operators extend or override entries through configuration
//! - Identities missing from the table are never auto-registered

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(group, version)` pair naming an aggregated API surface.
///
/// The core API uses the empty group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// The legacy core API, served under `/api/v1`.
    pub fn core_v1() -> Self {
        Self::new("", "v1")
    }

    /// Registry key for this identity: `version.group` (`v1.` for the core group).
    pub fn backend_name(&self) -> String {
        format!("{}.{}", self.version, self.group)
    }

    /// Request path prefix served by this identity.
    pub fn path_prefix(&self) -> String {
        if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Discovery ordering for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    /// Order of the group relative to other groups (higher sorts first).
    pub group: i32,
    /// Order of the version inside its group (higher sorts first).
    pub version: i32,
}

impl Priority {
    pub fn new(group: i32, version: i32) -> Self {
        Self { group, version }
    }
}

/// Lookup table from identity to discovery priority.
#[derive(Debug, Clone, Default)]
pub struct PriorityTable {
    entries: HashMap<GroupVersion, Priority>,
}

impl PriorityTable {
    /// An empty table. Nothing will be auto-registered against it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in entries.
    ///
    /// Append a new group below the lowest existing group priority minus 100 when unsure;
    /// version priority 9 leaves room on both sides.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert(GroupVersion::core_v1(), Priority::new(18000, 1));
        table.insert(
            GroupVersion::new("admissionregistration.k8s.io", "v1"),
            Priority::new(16700, 15),
        );
        table.insert(
            GroupVersion::new("admissionregistration.k8s.io", "v1beta1"),
            Priority::new(16700, 12),
        );
        table.insert(
            GroupVersion::new("admissionregistration.k8s.io", "v1alpha1"),
            Priority::new(16700, 9),
        );
        table.insert(
            GroupVersion::new("apiextensions.k8s.io", "v1"),
            Priority::new(16700, 15),
        );
        table
    }

    /// Insert or replace an entry, returning the previous priority.
    pub fn insert(&mut self, identity: GroupVersion, priority: Priority) -> Option<Priority> {
        self.entries.insert(identity, priority)
    }

    /// Apply operator overrides on top of the current entries.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (GroupVersion, Priority)>,
    {
        for (identity, priority) in overrides {
            if let Some(previous) = self.insert(identity.clone(), priority) {
                tracing::info!(
                    identity = %identity,
                    previous_group = previous.group,
                    previous_version = previous.version,
                    group = priority.group,
                    version = priority.version,
                    "Priority entry overridden"
                );
            }
        }
        self
    }

    pub fn get(&self, identity: &GroupVersion) -> Option<Priority> {
        self.entries.get(identity).copied()
    }

    pub fn contains(&self, identity: &GroupVersion) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in discovery order.
    pub fn discovery_order(&self) -> Vec<(GroupVersion, Priority)> {
        let mut ordered: Vec<_> = self
            .entries
            .iter()
            .map(|(identity, priority)| (identity.clone(), *priority))
            .collect();
        ordered.sort_by(|a, b| compare_discovery(&a.0, a.1, &b.0, b.1));
        ordered
    }
}

/// Discovery comparison: higher group priority first, then higher version priority,
/// then identity for a stable order.
pub fn compare_discovery(
    a: &GroupVersion,
    a_priority: Priority,
    b: &GroupVersion,
    b_priority: Priority,
) -> std::cmp::Ordering {
    b_priority
        .group
        .cmp(&a_priority.group)
        .then(b_priority.version.cmp(&a_priority.version))
        .then_with(|| a.cmp(b))
}
