//! The polymorphic payload stored and watched by the resource store.

use serde::{Deserialize, Serialize};

use crate::managed::ManagedResource;
use crate::meta::{Kind, ObjectMeta, ObjectRef};
use crate::microservice::Microservice;

/// Any object the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    /// An owner object.
    Microservice(Microservice),
    /// A dependent object.
    Managed(ManagedResource),
}

impl Object {
    /// The kind tag of this object.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Microservice(_) => Kind::Microservice,
            Self::Managed(r) => r.kind(),
        }
    }

    /// Shared metadata.
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Microservice(ms) => &ms.meta,
            Self::Managed(r) => r.meta(),
        }
    }

    /// Shared metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Microservice(ms) => &mut ms.meta,
            Self::Managed(r) => r.meta_mut(),
        }
    }

    /// Namespace-qualified identity.
    pub fn object_ref(&self) -> ObjectRef {
        self.meta().object_ref()
    }

    /// Unwrap as a microservice, if that is what this is.
    pub fn into_microservice(self) -> Option<Microservice> {
        match self {
            Self::Microservice(ms) => Some(ms),
            Self::Managed(_) => None,
        }
    }

    /// Unwrap as a managed resource, if that is what this is.
    pub fn into_managed(self) -> Option<ManagedResource> {
        match self {
            Self::Microservice(_) => None,
            Self::Managed(r) => Some(r),
        }
    }
}

impl From<Microservice> for Object {
    fn from(ms: Microservice) -> Self {
        Self::Microservice(ms)
    }
}

impl From<ManagedResource> for Object {
    fn from(r: ManagedResource) -> Self {
        Self::Managed(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::microservice::MicroserviceSpec;

    #[test]
    fn test_object_kind_and_ref() {
        let ms = Microservice::new("prod", "orders", MicroserviceSpec::new("orders:v1", 8082, 2));
        let obj = Object::from(ms);
        assert_eq!(obj.kind(), Kind::Microservice);
        assert_eq!(obj.object_ref().to_string(), "prod/orders");
        assert!(obj.into_microservice().is_some());
    }

    #[test]
    fn test_serde_round_trip() {
        let ms = Microservice::new("prod", "orders", MicroserviceSpec::new("orders:v1", 8082, 2));
        let obj = Object::from(ms);
        let json = serde_json::to_string(&obj).ok();
        assert!(json.is_some());
        let back: Option<Object> = json.and_then(|j| serde_json::from_str(&j).ok());
        assert_eq!(back.as_ref().map(Object::kind), Some(Kind::Microservice));
    }
}
