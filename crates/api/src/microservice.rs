//! The user-declared desired-state object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::meta::{Kind, ObjectMeta, OwnerReference};

/// Spec validation failure.
///
/// Admission validates specs before they reach the store; the
/// reconciler re-checks and treats a violation as a defect upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSpec {
    #[error("image must not be empty")]
    EmptyImage,

    #[error("port must be >= 0, got {port}")]
    NegativePort { port: i32 },

    #[error("replicas must be >= 1, got {replicas}")]
    TooFewReplicas { replicas: i32 },
}

/// Desired state of a microservice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroserviceSpec {
    /// Container image to run.
    pub image: String,
    /// Port the service listens on.
    pub port: i32,
    /// Desired replica count.
    pub replicas: i32,
}

impl MicroserviceSpec {
    /// Create a new spec.
    pub fn new(image: impl Into<String>, port: i32, replicas: i32) -> Self {
        Self {
            image: image.into(),
            port,
            replicas,
        }
    }

    /// Validate the admission invariants: `replicas >= 1`, `port >= 0`.
    pub fn validate(&self) -> Result<(), InvalidSpec> {
        if self.image.is_empty() {
            return Err(InvalidSpec::EmptyImage);
        }
        if self.port < 0 {
            return Err(InvalidSpec::NegativePort { port: self.port });
        }
        if self.replicas < 1 {
            return Err(InvalidSpec::TooFewReplicas {
                replicas: self.replicas,
            });
        }
        Ok(())
    }
}

/// Observed state written back by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MicroserviceStatus {
    /// Last generation whose dependents were all confirmed upserted.
    pub observed_generation: i64,
    /// Ready replica count observed from the workload replica set.
    pub ready_replicas: i32,
}

/// A microservice object: metadata, desired spec, observed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Microservice {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: MicroserviceSpec,
    /// Observed state.
    pub status: MicroserviceStatus,
}

impl Microservice {
    /// Create a new microservice with empty status.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: MicroserviceSpec,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: MicroserviceStatus::default(),
        }
    }

    /// Deterministic name of the owned workload replica set.
    pub fn workload_name(&self) -> String {
        self.meta.name.clone()
    }

    /// Deterministic name of the owned network endpoint.
    pub fn endpoint_name(&self) -> String {
        self.meta.name.clone()
    }

    /// Deterministic name of the owned scaling policy.
    pub fn policy_name(&self) -> String {
        format!("{}-hpa", self.meta.name)
    }

    /// An owner reference marking this microservice as controller.
    pub fn controller_ref(&self) -> OwnerReference {
        OwnerReference {
            owner_kind: Kind::Microservice,
            owner_name: self.meta.name.clone(),
            owner_uid: self.meta.uid,
            controller: true,
        }
    }

    /// Whether status already reflects the current generation.
    pub fn status_current(&self) -> bool {
        self.status.observed_generation == self.meta.generation
    }
}
