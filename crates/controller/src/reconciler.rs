//! Core reconciliation: drive dependent resources to match a
//! microservice's declared spec.
//!
//! Every pass re-reads full current state (level-triggered) and
//! performs the minimal set of creates/updates to converge. Per-resource
//! upserts are idempotent, so a pass interrupted after a partial apply
//! is safe to resume.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info};
use uuid::Uuid;

use steward_api::{
    EndpointSpec, Kind, ManagedResource, Microservice, NetworkEndpoint, Object, ObjectRef,
    OwnerReference, Protocol, ReplicaSetSpec, ReplicaSetStatus, ScalingPolicy, ScalingPolicySpec,
    WorkloadReplicaSet,
};
use steward_store::{ResourceStore, StoreError};

use crate::error::{Error, Result};

/// Finalizer the controller holds on every microservice it manages.
pub const FINALIZER: &str = "steward.dev/cleanup";

const DEFAULT_MIN_REPLICAS: i32 = 1;
const DEFAULT_MAX_REPLICAS: i32 = 5;
const TARGET_CPU_UTILIZATION: i32 = 50;

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Bound on every individual store call.
    pub call_timeout: Duration,
    /// Requeue delay while waiting for replicas to become ready.
    pub ready_poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(2),
        }
    }
}

impl ReconcilerConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the readiness requeue delay.
    #[must_use]
    pub const fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged; nothing more to do until the next change.
    Done,
    /// Converging but not yet observable; run again after this delay.
    RequeueAfter(Duration),
}

/// What an upsert had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upsert {
    Unchanged,
    Created,
    Updated,
}

/// Reconciler for microservice desired state.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(store: Arc<dyn ResourceStore>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Reconcile one identity.
    ///
    /// The identity may no longer exist; that is not an error. Any
    /// store failure aborts the pass — retries belong to the scheduler,
    /// not this function.
    pub async fn reconcile(&self, key: &ObjectRef) -> Result<ReconcileOutcome> {
        let ms = match self.fetch(Kind::Microservice, key).await? {
            Some(object) => object.into_microservice().ok_or_else(|| {
                Error::invariant_violation(key.clone(), "object is not a microservice")
            })?,
            None => {
                debug!(%key, "Microservice gone, nothing to reconcile");
                return Ok(ReconcileOutcome::Done);
            }
        };

        if ms.meta.is_deleting() {
            return self.finalize(ms).await;
        }

        if let Err(violation) = ms.spec.validate() {
            // Admission guarantees this never happens; if it does, the
            // identity stays divergent until the spec is corrected.
            error!(%key, error = %violation, "Spec violates admission invariants");
            return Err(Error::invariant_violation(key.clone(), violation.to_string()));
        }

        let ms = self.ensure_finalizer(ms).await?;
        let owner = ms.controller_ref();

        // Fixed order: the scaling policy references the workload, so
        // the workload must exist before the policy does.
        let (workload, w) = self
            .upsert(
                &owner,
                ManagedResource::WorkloadReplicaSet(desired_workload(&ms, &owner)),
            )
            .await?;
        let (_, e) = self
            .upsert(
                &owner,
                ManagedResource::NetworkEndpoint(desired_endpoint(&ms, &owner)),
            )
            .await?;
        let (_, p) = self
            .upsert(
                &owner,
                ManagedResource::ScalingPolicy(desired_policy(&ms, &owner)),
            )
            .await?;

        // All three dependents confirmed; only now may status claim it.
        let ready_replicas = match &workload {
            ManagedResource::WorkloadReplicaSet(set) => set.status.ready_replicas,
            _ => 0,
        };
        self.write_status(&ms, ready_replicas).await?;

        if [w, e, p].iter().any(|u| *u != Upsert::Unchanged) {
            info!(%key, generation = ms.meta.generation, "Reconciled");
        }

        if ready_replicas < ms.spec.replicas {
            debug!(%key, ready_replicas, desired = ms.spec.replicas, "Waiting for replicas");
            return Ok(ReconcileOutcome::RequeueAfter(self.config.ready_poll_interval));
        }
        Ok(ReconcileOutcome::Done)
    }

    /// Get-then-create-or-update for one dependent resource.
    async fn upsert(
        &self,
        owner: &OwnerReference,
        desired: ManagedResource,
    ) -> Result<(ManagedResource, Upsert)> {
        let kind = desired.kind();
        let key = desired.object_ref();

        let current = match self.fetch(kind, &key).await? {
            Some(object) => Some(object),
            None => match self.create_bounded(Object::from(desired.clone())).await {
                Ok(created) => {
                    debug!(%kind, %key, "Created dependent");
                    let managed = into_managed(created, &key)?;
                    return Ok((managed, Upsert::Created));
                }
                // Raced an earlier, partially applied pass: fall
                // through and verify what is there instead.
                Err(Error::Store(e)) if e.is_already_exists() => self.fetch(kind, &key).await?,
                Err(e) => return Err(e),
            },
        };

        let Some(current) = current else {
            // Vanished between the create conflict and the re-fetch.
            return Err(Error::Store(StoreError::not_found(
                kind,
                key.namespace,
                key.name,
            )));
        };
        let current = into_managed(current, &key)?;

        match current.meta().controller_owner() {
            Some(r) if r.owner_uid == owner.owner_uid => {}
            Some(r) => return Err(Error::ownership_conflict(kind, key, r.owner_uid)),
            // Exists but unowned: never adopt silently.
            None => return Err(Error::ownership_conflict(kind, key, Uuid::nil())),
        }

        if !divergent(&current, &desired) {
            return Ok((current, Upsert::Unchanged));
        }

        let expected_version = current.meta().resource_version;
        let updated = graft(&current, &desired);
        let stored = self
            .update_bounded(Object::from(updated), expected_version)
            .await?;
        info!(%kind, %key, "Corrected drift");
        Ok((into_managed(stored, &key)?, Upsert::Updated))
    }

    /// Delete dependents in reverse creation order, then release the
    /// finalizer so the store can drop the tombstoned owner.
    async fn finalize(&self, ms: Microservice) -> Result<ReconcileOutcome> {
        if !ms.meta.has_finalizer(FINALIZER) {
            return Ok(ReconcileOutcome::Done);
        }
        let key = ms.meta.object_ref();
        info!(%key, "Finalizing microservice");

        let targets = [
            (Kind::ScalingPolicy, ms.policy_name()),
            (Kind::NetworkEndpoint, ms.endpoint_name()),
            (Kind::WorkloadReplicaSet, ms.workload_name()),
        ];
        for (kind, name) in targets {
            let dependent_key = ObjectRef::new(ms.meta.namespace.clone(), name);
            let Some(current) = self.fetch(kind, &dependent_key).await? else {
                continue; // already gone
            };
            let ours = current
                .meta()
                .controller_owner()
                .is_some_and(|r| r.owner_uid == ms.meta.uid);
            if !ours {
                debug!(%kind, key = %dependent_key, "Skipping dependent with foreign owner");
                continue;
            }
            match self
                .delete_bounded(kind, &dependent_key, Some(current.meta().resource_version))
                .await
            {
                Ok(()) => debug!(%kind, key = %dependent_key, "Deleted dependent"),
                Err(Error::Store(e)) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let mut released = ms.clone();
        released.meta.remove_finalizer(FINALIZER);
        self.update_bounded(Object::from(released), ms.meta.resource_version)
            .await?;
        info!(%key, "Released finalizer");
        Ok(ReconcileOutcome::Done)
    }

    async fn ensure_finalizer(&self, ms: Microservice) -> Result<Microservice> {
        if ms.meta.has_finalizer(FINALIZER) {
            return Ok(ms);
        }
        let key = ms.meta.object_ref();
        let mut updated = ms.clone();
        updated.meta.finalizers.push(FINALIZER.to_string());
        let stored = self
            .update_bounded(Object::from(updated), ms.meta.resource_version)
            .await?;
        stored
            .into_microservice()
            .ok_or_else(|| Error::invariant_violation(key, "store returned wrong payload"))
    }

    /// Write observed generation and ready replicas, skipping the write
    /// when status already matches (no spurious updates).
    async fn write_status(&self, ms: &Microservice, ready_replicas: i32) -> Result<()> {
        if ms.status.observed_generation == ms.meta.generation
            && ms.status.ready_replicas == ready_replicas
        {
            return Ok(());
        }
        let mut updated = ms.clone();
        updated.status.observed_generation = ms.meta.generation;
        updated.status.ready_replicas = ready_replicas;
        self.update_bounded(Object::from(updated), ms.meta.resource_version)
            .await?;
        debug!(
            key = %ms.meta.object_ref(),
            generation = ms.meta.generation,
            ready_replicas,
            "Status updated"
        );
        Ok(())
    }

    // Store calls, each bounded by the per-call timeout.

    async fn fetch(&self, kind: Kind, key: &ObjectRef) -> Result<Option<Object>> {
        let call = self.store.get(kind, &key.namespace, &key.name);
        match timeout(self.config.call_timeout, call).await {
            Ok(Ok(object)) => Ok(Some(object)),
            Ok(Err(e)) if e.is_not_found() => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(Error::timeout("get")),
        }
    }

    async fn create_bounded(&self, object: Object) -> Result<Object> {
        match timeout(self.config.call_timeout, self.store.create(object)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::timeout("create")),
        }
    }

    async fn update_bounded(&self, object: Object, expected_version: u64) -> Result<Object> {
        let call = self.store.update(object, expected_version);
        match timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::timeout("update")),
        }
    }

    async fn delete_bounded(
        &self,
        kind: Kind,
        key: &ObjectRef,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let call = self
            .store
            .delete(kind, &key.namespace, &key.name, expected_version);
        match timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::timeout("delete")),
        }
    }
}

fn into_managed(object: Object, key: &ObjectRef) -> Result<ManagedResource> {
    object
        .into_managed()
        .ok_or_else(|| Error::invariant_violation(key.clone(), "store returned wrong payload"))
}

/// Whether the live resource's spec differs from the target.
fn divergent(current: &ManagedResource, desired: &ManagedResource) -> bool {
    match (current, desired) {
        (ManagedResource::WorkloadReplicaSet(c), ManagedResource::WorkloadReplicaSet(d)) => {
            c.spec != d.spec
        }
        (ManagedResource::NetworkEndpoint(c), ManagedResource::NetworkEndpoint(d)) => {
            c.spec != d.spec
        }
        (ManagedResource::ScalingPolicy(c), ManagedResource::ScalingPolicy(d)) => c.spec != d.spec,
        _ => true,
    }
}

/// Target spec grafted onto the live resource's metadata and status.
fn graft(current: &ManagedResource, desired: &ManagedResource) -> ManagedResource {
    match (current, desired) {
        (ManagedResource::WorkloadReplicaSet(c), ManagedResource::WorkloadReplicaSet(d)) => {
            ManagedResource::WorkloadReplicaSet(WorkloadReplicaSet {
                meta: c.meta.clone(),
                spec: d.spec.clone(),
                status: c.status.clone(),
            })
        }
        (ManagedResource::NetworkEndpoint(c), ManagedResource::NetworkEndpoint(d)) => {
            ManagedResource::NetworkEndpoint(NetworkEndpoint {
                meta: c.meta.clone(),
                spec: d.spec.clone(),
            })
        }
        (ManagedResource::ScalingPolicy(c), ManagedResource::ScalingPolicy(d)) => {
            ManagedResource::ScalingPolicy(ScalingPolicy {
                meta: c.meta.clone(),
                spec: d.spec.clone(),
            })
        }
        // Kind mismatch cannot happen: keys embed the kind.
        _ => desired.clone(),
    }
}

fn app_labels(ms: &Microservice) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), ms.meta.name.clone());
    labels
}

fn desired_workload(ms: &Microservice, owner: &OwnerReference) -> WorkloadReplicaSet {
    let labels = app_labels(ms);
    let mut annotations = BTreeMap::new();
    annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
    annotations.insert("prometheus.io/port".to_string(), ms.spec.port.to_string());
    annotations.insert("linkerd.io/inject".to_string(), "enabled".to_string());

    let mut meta = steward_api::ObjectMeta::new(ms.meta.namespace.clone(), ms.workload_name());
    meta.labels = labels.clone();
    meta.owner_references = vec![owner.clone()];

    WorkloadReplicaSet {
        meta,
        spec: ReplicaSetSpec {
            replicas: ms.spec.replicas,
            image: ms.spec.image.clone(),
            container_port: ms.spec.port,
            selector: labels.clone(),
            template_labels: labels,
            template_annotations: annotations,
        },
        status: ReplicaSetStatus::default(),
    }
}

fn desired_endpoint(ms: &Microservice, owner: &OwnerReference) -> NetworkEndpoint {
    let labels = app_labels(ms);
    let mut meta = steward_api::ObjectMeta::new(ms.meta.namespace.clone(), ms.endpoint_name());
    meta.labels = labels.clone();
    meta.owner_references = vec![owner.clone()];

    NetworkEndpoint {
        meta,
        spec: EndpointSpec {
            selector: labels,
            port: ms.spec.port,
            target_port: ms.spec.port,
            protocol: Protocol::Tcp,
        },
    }
}

fn desired_policy(ms: &Microservice, owner: &OwnerReference) -> ScalingPolicy {
    let mut meta = steward_api::ObjectMeta::new(ms.meta.namespace.clone(), ms.policy_name());
    meta.labels = app_labels(ms);
    meta.owner_references = vec![owner.clone()];

    ScalingPolicy {
        meta,
        spec: ScalingPolicySpec {
            target: ms.workload_name(),
            min_replicas: DEFAULT_MIN_REPLICAS,
            // The policy must never contradict the declared count.
            max_replicas: DEFAULT_MAX_REPLICAS.max(ms.spec.replicas),
            target_cpu_utilization: TARGET_CPU_UTILIZATION,
        },
    }
}
