//! Orphan collection for dependent resources.
//!
//! Normal cleanup runs through the finalizer path in the reconciler;
//! the sweeper is the level-triggered backstop that catches dependents
//! whose owner vanished without it (crash mid-finalize, manual store
//! edits, an owner recreated under a fresh UID).

use std::sync::Arc;

use tracing::{debug, info, warn};

use steward_api::{Kind, Object};
use steward_store::ResourceStore;

use crate::error::Result;

/// Sweeps dependent kinds for resources whose controller owner no
/// longer exists.
pub struct OrphanSweeper {
    store: Arc<dyn ResourceStore>,
}

impl OrphanSweeper {
    /// Create a new sweeper.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Sweep all managed kinds once, returning how many orphans were
    /// deleted.
    pub async fn sweep(&self) -> Result<usize> {
        let mut swept = 0;
        for kind in Kind::MANAGED {
            for object in self.store.list(kind).await? {
                if self.is_orphan(&object).await? {
                    swept += usize::from(self.delete_orphan(&object).await);
                }
            }
        }
        if swept > 0 {
            info!(swept, "Orphan sweep removed dependents");
        }
        Ok(swept)
    }

    /// A dependent is orphaned when its controller owner is gone, or
    /// when an object with the owner's name exists but carries a
    /// different UID (the owner was deleted and recreated).
    async fn is_orphan(&self, object: &Object) -> Result<bool> {
        let Some(owner) = object.meta().controller_owner() else {
            // Not controller-managed; leave it alone.
            return Ok(false);
        };
        if owner.owner_kind != Kind::Microservice {
            return Ok(false);
        }

        let namespace = &object.meta().namespace;
        match self.store.get(owner.owner_kind, namespace, &owner.owner_name).await {
            Ok(live) => Ok(live.meta().uid != owner.owner_uid),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort conditional delete; a concurrent writer wins the race.
    async fn delete_orphan(&self, object: &Object) -> bool {
        let kind = object.kind();
        let key = object.object_ref();
        let result = self
            .store
            .delete(
                kind,
                &key.namespace,
                &key.name,
                Some(object.meta().resource_version),
            )
            .await;
        match result {
            Ok(()) => {
                debug!(%kind, %key, "Deleted orphaned dependent");
                true
            }
            Err(e) if e.is_not_found() || e.is_conflict() => {
                debug!(%kind, %key, "Orphan changed under sweep, skipping");
                false
            }
            Err(e) => {
                warn!(%kind, %key, error = %e, "Failed to delete orphan");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_api::{
        EndpointSpec, ManagedResource, Microservice, MicroserviceSpec, NetworkEndpoint, ObjectMeta,
        OwnerReference, Protocol,
    };
    use steward_store::InMemoryStore;
    use uuid::Uuid;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn endpoint_owned_by(owner: OwnerReference) -> Object {
        let mut meta = ObjectMeta::new("prod", "orders");
        meta.owner_references = vec![owner];
        Object::from(ManagedResource::NetworkEndpoint(NetworkEndpoint {
            meta,
            spec: EndpointSpec {
                selector: Default::default(),
                port: 8082,
                target_port: 8082,
                protocol: Protocol::Tcp,
            },
        }))
    }

    async fn create_owner(store: &InMemoryStore) -> Result<Microservice> {
        let ms = Microservice::new("prod", "orders", MicroserviceSpec::new("orders:v1", 8082, 2));
        let stored = store.create(Object::from(ms)).await?;
        stored.into_microservice().ok_or_else(|| {
            crate::error::Error::invariant_violation(
                steward_api::ObjectRef::new("prod", "orders"),
                "wrong payload",
            )
        })
    }

    #[tokio::test]
    async fn test_dependent_with_live_owner_is_kept() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let ms = create_owner(&store).await?;
        store.create(endpoint_owned_by(ms.controller_ref())).await?;

        let swept = OrphanSweeper::new(store.clone()).sweep().await?;
        assert_eq!(swept, 0);
        assert!(store.get(Kind::NetworkEndpoint, "prod", "orders").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_with_missing_owner_is_swept() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let owner = OwnerReference {
            owner_kind: Kind::Microservice,
            owner_name: "orders".to_string(),
            owner_uid: Uuid::new_v4(),
            controller: true,
        };
        store.create(endpoint_owned_by(owner)).await?;

        let swept = OrphanSweeper::new(store.clone()).sweep().await?;
        assert_eq!(swept, 1);
        let result = store.get(Kind::NetworkEndpoint, "prod", "orders").await;
        assert!(matches!(result, Err(e) if e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn test_uid_mismatch_counts_as_orphaned() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        // Owner exists by name, but the dependent references a previous
        // incarnation's UID.
        create_owner(&store).await?;
        let stale = OwnerReference {
            owner_kind: Kind::Microservice,
            owner_name: "orders".to_string(),
            owner_uid: Uuid::new_v4(),
            controller: true,
        };
        store.create(endpoint_owned_by(stale)).await?;

        let swept = OrphanSweeper::new(store.clone()).sweep().await?;
        assert_eq!(swept, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unowned_resources_are_untouched() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let meta = ObjectMeta::new("prod", "hand-made");
        store
            .create(Object::from(ManagedResource::NetworkEndpoint(
                NetworkEndpoint {
                    meta,
                    spec: EndpointSpec {
                        selector: Default::default(),
                        port: 80,
                        target_port: 80,
                        protocol: Protocol::Tcp,
                    },
                },
            )))
            .await?;

        let swept = OrphanSweeper::new(store.clone()).sweep().await?;
        assert_eq!(swept, 0);
        assert!(store.get(Kind::NetworkEndpoint, "prod", "hand-made").await.is_ok());
        Ok(())
    }
}
