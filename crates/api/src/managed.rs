//! Dependent resources created by the controller.
//!
//! One tagged variant per kind, dispatched by exhaustive matching.
//! These are only ever written by the reconciler; direct external
//! mutation is drift and gets corrected on the next pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectMeta, ObjectRef};

/// Transport protocol for a network endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP (default).
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

/// Desired shape of a workload replica set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetSpec {
    /// Desired replica count.
    pub replicas: i32,
    /// Container image.
    pub image: String,
    /// Port the container listens on.
    pub container_port: i32,
    /// Label selector for pods of this set.
    pub selector: BTreeMap<String, String>,
    /// Labels applied to the pod template.
    pub template_labels: BTreeMap<String, String>,
    /// Annotations applied to the pod template.
    pub template_annotations: BTreeMap<String, String>,
}

/// Observed state of a workload replica set.
///
/// Written by the workload engine, read by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetStatus {
    /// Replicas currently ready.
    pub ready_replicas: i32,
}

/// A set of workload replicas mirroring a microservice spec 1:1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadReplicaSet {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: ReplicaSetSpec,
    /// Observed state.
    pub status: ReplicaSetStatus,
}

/// Desired shape of a network endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Selector matching the workload's pod labels.
    pub selector: BTreeMap<String, String>,
    /// Exposed port.
    pub port: i32,
    /// Port forwarded to on the workload.
    pub target_port: i32,
    /// Transport protocol.
    pub protocol: Protocol,
}

/// A network endpoint routing traffic to a workload replica set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: EndpointSpec,
}

/// Desired shape of a scaling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicySpec {
    /// Name of the workload replica set this policy scales.
    pub target: String,
    /// Lower replica bound.
    pub min_replicas: i32,
    /// Upper replica bound.
    pub max_replicas: i32,
    /// Target CPU utilization percentage.
    pub target_cpu_utilization: i32,
}

/// A scaling policy bound to a workload replica set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: ScalingPolicySpec,
}

/// Any dependent resource the controller manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagedResource {
    /// Workload replica set.
    WorkloadReplicaSet(WorkloadReplicaSet),
    /// Network endpoint.
    NetworkEndpoint(NetworkEndpoint),
    /// Scaling policy.
    ScalingPolicy(ScalingPolicy),
}

impl ManagedResource {
    /// The kind tag of this resource.
    pub fn kind(&self) -> Kind {
        match self {
            Self::WorkloadReplicaSet(_) => Kind::WorkloadReplicaSet,
            Self::NetworkEndpoint(_) => Kind::NetworkEndpoint,
            Self::ScalingPolicy(_) => Kind::ScalingPolicy,
        }
    }

    /// Shared metadata.
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::WorkloadReplicaSet(r) => &r.meta,
            Self::NetworkEndpoint(r) => &r.meta,
            Self::ScalingPolicy(r) => &r.meta,
        }
    }

    /// Shared metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::WorkloadReplicaSet(r) => &mut r.meta,
            Self::NetworkEndpoint(r) => &mut r.meta,
            Self::ScalingPolicy(r) => &mut r.meta,
        }
    }

    /// Namespace-qualified identity.
    pub fn object_ref(&self) -> ObjectRef {
        self.meta().object_ref()
    }
}
