//! Registration storage.
//!
//! # Responsibilities
//! - Storage options scoped to the aggregation layer's persisted types
//! - In-memory `RegistryStore` used by the binary and tests
//! - Emit a `StatusEvent` for every create and every status write
//!
//! # Design Decisions
//! - Upserts are idempotent; a conflicting priority or service is rejected
//! - The feed is a bounded broadcast channel; slow consumers re-list on lag

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::broadcast;

use crate::config::{RegistryConfig, StorageCodec};
use crate::discovery::priority::GroupVersion;
use crate::registry::{
    BackendDescriptor, Registration, RegistrationError, RegistryStore, StatusEvent, UpsertOutcome,
};

/// Group of the registration records themselves.
pub const REGISTRATION_GROUP: &str = "apiregistration.k8s.io";

/// Group of the external-name mapping records.
pub const SERVICE_GROUP: &str = "service.grafana.app";

const FEED_CAPACITY: usize = 256;

/// Storage settings for the aggregation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageOptions {
    /// Key prefix for persisted records.
    pub prefix: String,
    pub codec: StorageCodec,
    /// Version each persisted group is encoded at.
    pub encode_versions: BTreeMap<String, GroupVersion>,
    /// Health endpoints for the storage are wired by the caller, not here.
    pub skip_health_endpoints: bool,
}

impl StorageOptions {
    /// Options for the aggregation layer's own persisted types.
    pub fn for_aggregator(config: &RegistryConfig) -> Self {
        let mut encode_versions = BTreeMap::new();
        encode_versions.insert(
            REGISTRATION_GROUP.to_string(),
            GroupVersion::new(REGISTRATION_GROUP, "v1"),
        );
        encode_versions.insert(
            SERVICE_GROUP.to_string(),
            GroupVersion::new(SERVICE_GROUP, "v0alpha1"),
        );

        Self {
            prefix: config.storage_prefix.clone(),
            codec: config.codec,
            encode_versions,
            skip_health_endpoints: true,
        }
    }

    pub fn encode_version(&self, group: &str) -> Option<&GroupVersion> {
        self.encode_versions.get(group)
    }

    /// Storage key of a descriptor.
    pub fn key_for(&self, descriptor: &BackendDescriptor) -> String {
        format!("{}/apiservices/{}", self.prefix.trim_end_matches('/'), descriptor.name())
    }

    /// Encode a registration in its persisted form.
    pub fn encode(&self, registration: &Registration) -> Result<Vec<u8>, RegistrationError> {
        let api_version = self
            .encode_version(REGISTRATION_GROUP)
            .map(ToString::to_string)
            .ok_or_else(|| {
                RegistrationError::Unavailable(format!("no encode version for {}", REGISTRATION_GROUP))
            })?;
        let descriptor = &registration.descriptor;

        let document = json!({
            "apiVersion": api_version,
            "kind": "APIService",
            "metadata": { "name": descriptor.name() },
            "spec": {
                "group": descriptor.identity().group,
                "version": descriptor.identity().version,
                "groupPriorityMinimum": descriptor.priority().group,
                "versionPriority": descriptor.priority().version,
                "service": descriptor.service().map(|s| s.name.clone()),
            },
            "status": {
                "available": registration.available,
                "message": registration.message,
            },
        });

        match self.codec {
            StorageCodec::Json => Ok(serde_json::to_vec(&document)?),
        }
    }
}

/// Process-local registration store.
#[derive(Debug)]
pub struct MemoryRegistry {
    options: StorageOptions,
    records: DashMap<GroupVersion, Registration>,
    encoded: DashMap<String, Vec<u8>>,
    events: broadcast::Sender<StatusEvent>,
}

impl MemoryRegistry {
    pub fn new(options: StorageOptions) -> Self {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            options,
            records: DashMap::new(),
            encoded: DashMap::new(),
            events,
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Persisted bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.encoded.get(key).map(|bytes| bytes.clone())
    }

    /// Remove a registration (external deregistration).
    pub fn remove(&self, identity: &GroupVersion) -> Option<Registration> {
        let (_, registration) = self.records.remove(identity)?;
        self.encoded.remove(&self.options.key_for(&registration.descriptor));
        Some(registration)
    }

    fn persist(&self, registration: &Registration) -> Result<(), RegistrationError> {
        let bytes = self.options.encode(registration)?;
        self.encoded
            .insert(self.options.key_for(&registration.descriptor), bytes);
        Ok(())
    }

    fn emit(&self, identity: &GroupVersion, available: bool) {
        // No subscribers is fine; the listener resyncs from `list` when it starts.
        let _ = self.events.send(StatusEvent {
            identity: identity.clone(),
            available,
        });
    }
}

impl RegistryStore for MemoryRegistry {
    fn upsert(&self, descriptor: &BackendDescriptor) -> Result<UpsertOutcome, RegistrationError> {
        let identity = descriptor.identity().clone();

        let available = match self.records.entry(identity.clone()) {
            Entry::Occupied(existing) => {
                let current = &existing.get().descriptor;
                if current.priority() != descriptor.priority() {
                    return Err(RegistrationError::Conflict {
                        identity,
                        reason: format!(
                            "registered with priority {}/{}, submitted {}/{}",
                            current.priority().group,
                            current.priority().version,
                            descriptor.priority().group,
                            descriptor.priority().version
                        ),
                    });
                }
                if current.service() != descriptor.service() {
                    return Err(RegistrationError::Conflict {
                        identity,
                        reason: "registered with a different service".to_string(),
                    });
                }
                return Ok(UpsertOutcome::Unchanged);
            }
            Entry::Vacant(slot) => {
                let registration = Registration {
                    descriptor: descriptor.clone(),
                    available: false,
                    message: None,
                };
                self.persist(&registration)?;
                slot.insert(registration);
                false
            }
        };

        tracing::debug!(identity = %identity, "Registration created");
        self.emit(&identity, available);
        Ok(UpsertOutcome::Created)
    }

    fn get(&self, identity: &GroupVersion) -> Option<Registration> {
        self.records.get(identity).map(|r| r.clone())
    }

    fn list(&self) -> Vec<Registration> {
        let mut all: Vec<Registration> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.descriptor.identity().cmp(b.descriptor.identity()));
        all
    }

    fn set_available(
        &self,
        identity: &GroupVersion,
        available: bool,
        message: Option<String>,
    ) -> Result<(), RegistrationError> {
        {
            let mut record = self
                .records
                .get_mut(identity)
                .ok_or_else(|| RegistrationError::NotFound(identity.clone()))?;
            if record.available != available {
                tracing::info!(identity = %identity, available, "Backend availability changed");
            }
            record.available = available;
            record.message = message;
            self.persist(&record)?;
        }

        self.emit(identity, available);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::priority::Priority;
    use crate::registry::ServiceReference;

    fn registry() -> MemoryRegistry {
        MemoryRegistry::new(StorageOptions::for_aggregator(&RegistryConfig::default()))
    }

    fn descriptor(group: &str) -> BackendDescriptor {
        BackendDescriptor::local(GroupVersion::new(group, "v1"), Priority::new(100, 9))
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = registry();
        assert_eq!(store.upsert(&descriptor("g1")).unwrap(), UpsertOutcome::Created);
        assert_eq!(store.upsert(&descriptor("g1")).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn upsert_rejects_conflicting_priority() {
        let store = registry();
        store.upsert(&descriptor("g1")).unwrap();

        let conflicting = BackendDescriptor::local(GroupVersion::new("g1", "v1"), Priority::new(1, 1));
        let err = store.upsert(&conflicting).unwrap_err();
        assert!(matches!(err, RegistrationError::Conflict { .. }));

        let other_service = BackendDescriptor::external(
            GroupVersion::new("g1", "v1"),
            Priority::new(100, 9),
            ServiceReference { name: "svc".into() },
        );
        assert!(store.upsert(&other_service).is_err());
    }

    #[tokio::test]
    async fn every_write_emits_an_event() {
        let store = registry();
        let mut events = store.subscribe();
        let gv = GroupVersion::new("g1", "v1");

        store.upsert(&descriptor("g1")).unwrap();
        store.set_available(&gv, true, None).unwrap();
        store.set_available(&gv, true, None).unwrap();

        let expected = [false, true, true];
        for available in expected {
            let event = events.recv().await.unwrap();
            assert_eq!(event, StatusEvent { identity: gv.clone(), available });
        }
    }

    #[test]
    fn set_available_requires_registration() {
        let store = registry();
        let err = store
            .set_available(&GroupVersion::new("missing", "v1"), true, None)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::NotFound(_)));
    }

    #[test]
    fn persists_encoded_registration() {
        let store = registry();
        let d = descriptor("g1");
        store.upsert(&d).unwrap();
        store
            .set_available(d.identity(), false, Some("probe failed".into()))
            .unwrap();

        let key = store.options().key_for(&d);
        assert_eq!(key, "/registry/aggregator/apiservices/v1.g1");

        let raw = store.raw(&key).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(doc["apiVersion"], "apiregistration.k8s.io/v1");
        assert_eq!(doc["spec"]["groupPriorityMinimum"], 100);
        assert_eq!(doc["status"]["message"], "probe failed");

        store.remove(d.identity()).unwrap();
        assert!(store.raw(&key).is_none());
    }
}
