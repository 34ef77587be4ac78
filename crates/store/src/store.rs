//! Resource store trait and watch subscription types.

use async_trait::async_trait;
use tokio::sync::broadcast;

use steward_api::{Kind, Object};

use crate::error::{Result, StoreError};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Object was created.
    Added,
    /// Object was updated (including deletion tombstones).
    Modified,
    /// Object was removed.
    Deleted,
}

/// A single change observed on the store.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// What happened.
    pub event_type: EventType,
    /// The object after the change (before, for `Deleted`).
    pub object: Object,
}

/// Subscription to a store's change stream, filtered to one kind.
pub struct WatchSubscription {
    receiver: broadcast::Receiver<WatchEvent>,
    kind: Kind,
}

impl WatchSubscription {
    /// Create a subscription filtering the given kind.
    pub fn new(receiver: broadcast::Receiver<WatchEvent>, kind: Kind) -> Self {
        Self { receiver, kind }
    }

    /// Receive the next event for this subscription's kind.
    ///
    /// A lagged stream surfaces as [`StoreError::WatchLagged`]; the
    /// consumer is expected to re-list, since reconciliation is
    /// level-triggered and never depends on individual payloads.
    pub async fn recv(&mut self) -> Result<WatchEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.object.kind() == self.kind => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(StoreError::WatchLagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return Err(StoreError::WatchClosed),
            }
        }
    }
}

/// A versioned, optimistic-concurrency store of typed objects.
///
/// All controller mutation goes through these primitives; a version
/// mismatch surfaces as [`StoreError::Conflict`] rather than a silent
/// overwrite.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one object by identity.
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object>;

    /// Create an object; the store assigns uid and resource version.
    async fn create(&self, object: Object) -> Result<Object>;

    /// Conditionally update an object, keyed on its resource version.
    async fn update(&self, object: Object, expected_version: u64) -> Result<Object>;

    /// Delete an object, optionally keyed on its resource version.
    ///
    /// Objects carrying finalizers are tombstoned instead of removed;
    /// removal happens once the last finalizer is cleared.
    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        expected_version: Option<u64>,
    ) -> Result<()>;

    /// List all objects of one kind.
    async fn list(&self, kind: Kind) -> Result<Vec<Object>>;

    /// Subscribe to changes for one kind.
    fn watch(&self, kind: Kind) -> WatchSubscription;
}

/// A wrapper that adds tracing to a resource store.
pub struct TracingStore<S: ResourceStore> {
    inner: S,
}

impl<S: ResourceStore> TracingStore<S> {
    /// Create a new tracing store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for TracingStore<S> {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Object> {
        tracing::trace!(%kind, namespace, name, "Get");
        self.inner.get(kind, namespace, name).await
    }

    async fn create(&self, object: Object) -> Result<Object> {
        tracing::debug!(kind = %object.kind(), key = %object.object_ref(), "Create");
        self.inner.create(object).await
    }

    async fn update(&self, object: Object, expected_version: u64) -> Result<Object> {
        tracing::debug!(
            kind = %object.kind(),
            key = %object.object_ref(),
            expected_version,
            "Update"
        );
        self.inner.update(object, expected_version).await
    }

    async fn delete(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
        expected_version: Option<u64>,
    ) -> Result<()> {
        tracing::debug!(%kind, namespace, name, "Delete");
        self.inner.delete(kind, namespace, name, expected_version).await
    }

    async fn list(&self, kind: Kind) -> Result<Vec<Object>> {
        tracing::trace!(%kind, "List");
        self.inner.list(kind).await
    }

    fn watch(&self, kind: Kind) -> WatchSubscription {
        tracing::debug!(%kind, "Watch");
        self.inner.watch(kind)
    }
}
