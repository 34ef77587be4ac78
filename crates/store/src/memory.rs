//! In-memory resource store.
//!
//! Backs tests and the dev binary. Honors the same contract a real
//! backend would: monotonically increasing resource versions,
//! conditional updates, finalizer tombstones, and a broadcast change
//! stream. There is no native cascade on owner deletion; orphan
//! collection is the controller's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use steward_api::{Kind, Object};

use crate::error::{Result, StoreError};
use crate::store::{EventType, ResourceStore, WatchEvent, WatchSubscription};

const WATCH_CHANNEL_CAPACITY: usize = 1024;

type Key = (Kind, String, String);

/// In-memory implementation of [`ResourceStore`].
pub struct InMemoryStore {
    objects: RwLock<HashMap<Key, Object>>,
    next_version: AtomicU64,
    watch_tx: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            watch_tx,
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event_type: EventType, object: Object) {
        // No receivers is fine; watches are optional.
        let _ = self.watch_tx.send(WatchEvent { event_type, object });
    }

    fn key_of(object: &Object) -> Key {
        let meta = object.meta();
        (object.kind(), meta.namespace.clone(), meta.name.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object> {
        let objects = self.objects.read().await;
        objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }

    async fn create(&self, mut object: Object) -> Result<Object> {
        let key = Self::key_of(&object);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::already_exists(key.0, key.1, key.2));
        }

        let version = self.bump_version();
        let meta = object.meta_mut();
        meta.uid = Uuid::new_v4();
        meta.resource_version = version;
        meta.generation = 1;
        meta.deletion_timestamp = None;

        objects.insert(key, object.clone());
        drop(objects);

        self.emit(EventType::Added, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: Object, expected_version: u64) -> Result<Object> {
        let key = Self::key_of(&object);
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(key.0, key.1.clone(), key.2.clone()))?;

        let current_version = current.meta().resource_version;
        if current_version != expected_version {
            return Err(StoreError::Conflict {
                kind: key.0,
                namespace: key.1,
                name: key.2,
                expected: expected_version,
                current: current_version,
            });
        }

        // Spec changes on the owner object advance its generation.
        let generation = match (&object, current) {
            (Object::Microservice(new), Object::Microservice(old)) if new.spec != old.spec => {
                old.meta.generation + 1
            }
            _ => current.meta().generation,
        };

        // Identity and tombstone state are store-owned.
        let uid = current.meta().uid;
        let deletion_timestamp = current.meta().deletion_timestamp;

        let version = self.bump_version();
        let meta = object.meta_mut();
        meta.uid = uid;
        meta.generation = generation;
        meta.resource_version = version;
        meta.deletion_timestamp = deletion_timestamp;

        // Clearing the last finalizer of a tombstoned object releases it.
        if meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
            objects.remove(&Self::key_of(&object));
            drop(objects);
            self.emit(EventType::Deleted, object.clone());
            return Ok(object);
        }

        objects.insert(Self::key_of(&object), object.clone());
        drop(objects);

        self.emit(EventType::Modified, object.clone());
        Ok(object)
    }

    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let key = (kind, namespace.to_string(), name.to_string());
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))?;

        if let Some(expected) = expected_version {
            let current_version = current.meta().resource_version;
            if current_version != expected {
                return Err(StoreError::Conflict {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    expected,
                    current: current_version,
                });
            }
        }

        if !current.meta().finalizers.is_empty() {
            if current.meta().deletion_timestamp.is_some() {
                // Already tombstoned; deletion is pending finalization.
                return Ok(());
            }
            let mut tombstoned = current.clone();
            let version = self.bump_version();
            let meta = tombstoned.meta_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = version;
            objects.insert(key, tombstoned.clone());
            drop(objects);
            self.emit(EventType::Modified, tombstoned);
            return Ok(());
        }

        let removed = objects.remove(&key);
        drop(objects);
        if let Some(object) = removed {
            self.emit(EventType::Deleted, object);
        }
        Ok(())
    }

    async fn list(&self, kind: Kind) -> Result<Vec<Object>> {
        let objects = self.objects.read().await;
        let mut items: Vec<Object> = objects
            .values()
            .filter(|o| o.kind() == kind)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            (&a.meta().namespace, &a.meta().name).cmp(&(&b.meta().namespace, &b.meta().name))
        });
        Ok(items)
    }

    fn watch(&self, kind: Kind) -> WatchSubscription {
        WatchSubscription::new(self.watch_tx.subscribe(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_api::{Microservice, MicroserviceSpec};

    fn orders() -> Object {
        Object::from(Microservice::new(
            "prod",
            "orders",
            MicroserviceSpec::new("orders:v1", 8082, 2),
        ))
    }

    #[tokio::test]
    async fn test_create_assigns_identity() -> Result<()> {
        let store = InMemoryStore::new();
        let created = store.create(orders()).await?;

        assert!(!created.meta().uid.is_nil());
        assert!(created.meta().resource_version > 0);
        assert_eq!(created.meta().generation, 1);

        let fetched = store.get(Kind::Microservice, "prod", "orders").await?;
        assert_eq!(fetched, created);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() -> Result<()> {
        let store = InMemoryStore::new();
        store.create(orders()).await?;
        let err = store.create(orders()).await;
        assert!(matches!(err, Err(e) if e.is_already_exists()));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_stale_version_conflicts() -> Result<()> {
        let store = InMemoryStore::new();
        let created = store.create(orders()).await?;
        let stale = created.meta().resource_version;

        store.update(created.clone(), stale).await?;

        let err = store.update(created, stale).await;
        assert!(matches!(err, Err(e) if e.is_conflict()));
        Ok(())
    }

    #[tokio::test]
    async fn test_spec_change_bumps_generation() -> Result<()> {
        let store = InMemoryStore::new();
        let created = store.create(orders()).await?;
        let version = created.meta().resource_version;

        // Write with an unchanged spec: generation stays put.
        let updated = store.update(created.clone(), version).await?;
        assert_eq!(updated.meta().generation, 1);

        // Spec write: generation advances.
        let mut changed = match updated.clone() {
            Object::Microservice(ms) => ms,
            Object::Managed(_) => return Err(StoreError::unavailable("wrong kind")),
        };
        changed.spec.replicas = 3;
        let updated = store
            .update(Object::from(changed), updated.meta().resource_version)
            .await?;
        assert_eq!(updated.meta().generation, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_finalizer_defers_removal() -> Result<()> {
        let store = InMemoryStore::new();
        let mut object = orders();
        object
            .meta_mut()
            .finalizers
            .push("steward.dev/cleanup".to_string());
        let created = store.create(object).await?;

        store
            .delete(Kind::Microservice, "prod", "orders", None)
            .await?;

        // Still present, now tombstoned.
        let tombstoned = store.get(Kind::Microservice, "prod", "orders").await?;
        assert!(tombstoned.meta().is_deleting());
        assert_eq!(tombstoned.meta().uid, created.meta().uid);

        // Clearing the finalizer releases the object.
        let mut released = tombstoned.clone();
        released.meta_mut().remove_finalizer("steward.dev/cleanup");
        store
            .update(released, tombstoned.meta().resource_version)
            .await?;

        let gone = store.get(Kind::Microservice, "prod", "orders").await;
        assert!(matches!(gone, Err(e) if e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_removes() -> Result<()> {
        let store = InMemoryStore::new();
        store.create(orders()).await?;
        store
            .delete(Kind::Microservice, "prod", "orders", None)
            .await?;
        let gone = store.get(Kind::Microservice, "prod", "orders").await;
        assert!(matches!(gone, Err(e) if e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn test_watch_filters_by_kind() -> Result<()> {
        let store = InMemoryStore::new();
        let mut sub = store.watch(Kind::Microservice);

        store.create(orders()).await?;

        let event = sub.recv().await?;
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.object.kind(), Kind::Microservice);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_filtered() -> Result<()> {
        let store = InMemoryStore::new();
        for name in ["zeta", "alpha"] {
            store
                .create(Object::from(Microservice::new(
                    "prod",
                    name,
                    MicroserviceSpec::new("img:v1", 80, 1),
                )))
                .await?;
        }

        let items = store.list(Kind::Microservice).await?;
        let names: Vec<&str> = items.iter().map(|o| o.meta().name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(store.list(Kind::WorkloadReplicaSet).await?.is_empty());
        Ok(())
    }
}
