//! Object model for the steward reconciliation controller.
//!
//! Four stored kinds: the user-declared [`Microservice`] and the three
//! dependent resources the controller derives from it — a
//! [`WorkloadReplicaSet`], a [`NetworkEndpoint`] and a
//! [`ScalingPolicy`]. Dependents carry an [`OwnerReference`] back to
//! their controlling microservice by UID.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod managed;
pub mod meta;
pub mod microservice;
pub mod object;

// Re-export main types
pub use managed::{
    EndpointSpec, ManagedResource, NetworkEndpoint, Protocol, ReplicaSetSpec, ReplicaSetStatus,
    ScalingPolicy, ScalingPolicySpec, WorkloadReplicaSet,
};
pub use meta::{Kind, ObjectMeta, ObjectRef, OwnerReference};
pub use microservice::{InvalidSpec, Microservice, MicroserviceSpec, MicroserviceStatus};
pub use object::Object;
