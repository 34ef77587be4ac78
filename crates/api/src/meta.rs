//! Object metadata shared by every stored kind.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of objects the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// User-declared desired state.
    Microservice,
    /// Workload replica set realizing the spec.
    WorkloadReplicaSet,
    /// Network endpoint exposing the workload.
    NetworkEndpoint,
    /// Scaling policy referencing the workload.
    ScalingPolicy,
}

impl Kind {
    /// The managed (dependent) kinds, in the reconciler's creation order.
    pub const MANAGED: [Kind; 3] = [
        Kind::WorkloadReplicaSet,
        Kind::NetworkEndpoint,
        Kind::ScalingPolicy,
    ];

    /// Check whether this kind is a dependent resource kind.
    pub fn is_managed(&self) -> bool {
        !matches!(self, Self::Microservice)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Microservice => "Microservice",
            Self::WorkloadReplicaSet => "WorkloadReplicaSet",
            Self::NetworkEndpoint => "NetworkEndpoint",
            Self::ScalingPolicy => "ScalingPolicy",
        };
        write!(f, "{s}")
    }
}

/// Namespace-qualified identity of an object.
///
/// This is the unit of reconciliation: the work queue holds these, and
/// every pass re-reads full state for one of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object name, unique within the namespace for its kind.
    pub name: String,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Back-reference from a dependent resource to its owner.
///
/// Ownership is matched by UID, never by name: an owner deleted and
/// recreated under the same name gets a fresh UID, so stale dependents
/// can never alias the new generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Kind of the owning object.
    pub owner_kind: Kind,
    /// Name of the owning object (same namespace as the dependent).
    pub owner_name: String,
    /// UID of the owning object.
    pub owner_uid: Uuid,
    /// Whether this owner is the managing controller.
    pub controller: bool,
}

/// Metadata carried by every stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Unique identity, assigned by the store on create.
    pub uid: Uuid,
    /// Spec generation, bumped by the store on every spec change.
    pub generation: i64,
    /// Optimistic-concurrency token, bumped by the store on every write.
    pub resource_version: u64,
    /// Labels for selector matching.
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations.
    pub annotations: BTreeMap<String, String>,
    /// Back-references to owning objects.
    pub owner_references: Vec<OwnerReference>,
    /// Finalizers that must be cleared before the object is removed.
    pub finalizers: Vec<String>,
    /// Set by the store when deletion is requested but finalizers remain.
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Create metadata for a new object; the store fills in identity fields.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: Uuid::nil(),
            generation: 0,
            resource_version: 0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
            finalizers: Vec::new(),
            deletion_timestamp: None,
        }
    }

    /// The namespace-qualified identity of this object.
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.namespace.clone(), self.name.clone())
    }

    /// The owner reference marked as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether deletion has been requested for this object.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Check if a finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Remove a finalizer if present.
    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }
}
