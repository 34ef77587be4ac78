//! Feeds the work queue from store watch streams.
//!
//! One watch task per kind. Changes to a microservice enqueue its own
//! identity; changes to a dependent enqueue the owning microservice's
//! identity, so drift anywhere converges through the same single path.
//! Every (re)connect starts with a full re-list, which makes lagged or
//! dropped streams safe: the payloads themselves are never trusted as
//! state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use steward_api::{Kind, Object, ObjectRef};
use steward_store::{ResourceStore, StoreError};

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::queue::WorkQueue;

/// Watches the store and translates events into queued identities.
pub struct ChangeNotifier {
    store: Arc<dyn ResourceStore>,
    queue: Arc<WorkQueue>,
    reconnect: BackoffPolicy,
}

/// The microservice identity a change maps to, if any.
fn owner_key(object: &Object) -> Option<ObjectRef> {
    match object {
        Object::Microservice(_) => Some(object.object_ref()),
        Object::Managed(_) => {
            let owner = object.meta().controller_owner()?;
            if owner.owner_kind != Kind::Microservice {
                return None;
            }
            Some(ObjectRef::new(
                object.meta().namespace.clone(),
                owner.owner_name.clone(),
            ))
        }
    }
}

impl ChangeNotifier {
    /// Create a new notifier.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        queue: Arc<WorkQueue>,
        reconnect: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            reconnect,
        }
    }

    /// Spawn one watch task per kind. Tasks exit on shutdown.
    pub fn run(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let kinds = [
            Kind::Microservice,
            Kind::WorkloadReplicaSet,
            Kind::NetworkEndpoint,
            Kind::ScalingPolicy,
        ];
        kinds
            .into_iter()
            .map(|kind| {
                let notifier = Arc::clone(&self);
                let mut shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    tokio::select! {
                        () = notifier.watch_kind(kind) => {}
                        _ = shutdown.recv() => {
                            debug!(%kind, "Watch task shutting down");
                        }
                    }
                })
            })
            .collect()
    }

    /// Watch one kind forever, re-listing and reconnecting as needed.
    async fn watch_kind(&self, kind: Kind) {
        let mut disconnects: u32 = 0;
        loop {
            if let Err(e) = self.enqueue_listed(kind).await {
                warn!(%kind, error = %e, "Re-list failed, retrying");
                tokio::time::sleep(self.reconnect.delay(disconnects)).await;
                disconnects = disconnects.saturating_add(1);
                continue;
            }

            let mut subscription = self.store.watch(kind);
            disconnects = 0;
            loop {
                match subscription.recv().await {
                    Ok(event) => {
                        if let Some(key) = owner_key(&event.object) {
                            trace!(%kind, %key, event_type = ?event.event_type, "Change observed");
                            self.queue.add(key);
                        }
                    }
                    Err(StoreError::WatchLagged { skipped }) => {
                        // Events were dropped; the re-list covers them.
                        warn!(%kind, skipped, "Watch lagged, re-listing");
                        break;
                    }
                    Err(_) => {
                        warn!(%kind, "Watch stream closed, reconnecting");
                        tokio::time::sleep(self.reconnect.delay(disconnects)).await;
                        disconnects = disconnects.saturating_add(1);
                        break;
                    }
                }
            }
        }
    }

    /// Enqueue every identity a fresh listing of `kind` maps to.
    async fn enqueue_listed(&self, kind: Kind) -> Result<usize> {
        let objects = self.store.list(kind).await?;
        let mut enqueued = 0;
        for object in &objects {
            if let Some(key) = owner_key(object) {
                self.queue.add(key);
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Enqueue every known microservice for a full pass.
    ///
    /// This is the periodic resync: it repairs drift that produced no
    /// watch event at all.
    pub async fn resync_once(&self) -> Result<usize> {
        let enqueued = self.enqueue_listed(Kind::Microservice).await?;
        debug!(enqueued, "Resync enqueued all microservices");
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use steward_api::{Microservice, MicroserviceSpec};
    use steward_store::InMemoryStore;
    use tokio::time::timeout;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn notifier(store: Arc<InMemoryStore>, queue: Arc<WorkQueue>) -> Arc<ChangeNotifier> {
        Arc::new(ChangeNotifier::new(
            store,
            queue,
            BackoffPolicy::default().with_base(Duration::from_millis(10)),
        ))
    }

    fn orders() -> Object {
        Object::from(Microservice::new(
            "prod",
            "orders",
            MicroserviceSpec::new("orders:v1", 8082, 2),
        ))
    }

    #[tokio::test]
    async fn test_microservice_change_enqueues_its_identity() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WorkQueue::new());
        let (shutdown, _) = broadcast::channel(1);
        let tasks = notifier(store.clone(), queue.clone()).run(&shutdown);

        store.create(orders()).await?;

        let key = timeout(Duration::from_secs(1), queue.next()).await?;
        assert_eq!(key, Some(ObjectRef::new("prod", "orders")));

        shutdown.send(()).ok();
        for task in tasks {
            task.await.ok();
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_change_enqueues_owner_identity() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WorkQueue::new());

        let created = store.create(orders()).await?;
        let ms = created.into_microservice().ok_or("wrong payload")?;

        // Drain the creation event before watching the dependent.
        let (shutdown, _) = broadcast::channel(1);
        let tasks = notifier(store.clone(), queue.clone()).run(&shutdown);
        let first = timeout(Duration::from_secs(1), queue.next()).await?;
        assert_eq!(first, Some(ObjectRef::new("prod", "orders")));
        queue.done(&ObjectRef::new("prod", "orders"));

        let mut meta = steward_api::ObjectMeta::new("prod", "orders");
        meta.owner_references = vec![ms.controller_ref()];
        store
            .create(Object::from(steward_api::ManagedResource::NetworkEndpoint(
                steward_api::NetworkEndpoint {
                    meta,
                    spec: steward_api::EndpointSpec {
                        selector: Default::default(),
                        port: 8082,
                        target_port: 8082,
                        protocol: steward_api::Protocol::Tcp,
                    },
                },
            )))
            .await?;

        let key = timeout(Duration::from_secs(1), queue.next()).await?;
        assert_eq!(key, Some(ObjectRef::new("prod", "orders")));

        shutdown.send(()).ok();
        for task in tasks {
            task.await.ok();
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_resync_enqueues_every_microservice() -> TestResult {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WorkQueue::new());

        store.create(orders()).await?;
        store
            .create(Object::from(Microservice::new(
                "prod",
                "payments",
                MicroserviceSpec::new("payments:v1", 8083, 1),
            )))
            .await?;

        let enqueued = notifier(store, queue.clone()).resync_once().await?;
        assert_eq!(enqueued, 2);
        assert_eq!(queue.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unowned_dependent_maps_to_nothing() -> TestResult {
        let meta = steward_api::ObjectMeta::new("prod", "hand-made");
        let object = Object::from(steward_api::ManagedResource::NetworkEndpoint(
            steward_api::NetworkEndpoint {
                meta,
                spec: steward_api::EndpointSpec {
                    selector: Default::default(),
                    port: 80,
                    target_port: 80,
                    protocol: steward_api::Protocol::Tcp,
                },
            },
        ));
        assert_eq!(owner_key(&object), None);
        Ok(())
    }
}
