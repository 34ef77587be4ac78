//! Error types for the controller crate.

use std::fmt;

use steward_api::{Kind, ObjectRef};
use steward_store::StoreError;
use uuid::Uuid;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types.
#[derive(Debug, Clone)]
pub enum Error {
    /// A store call failed.
    Store(StoreError),
    /// A target resource exists but is controlled by someone else.
    OwnershipConflict {
        kind: Kind,
        key: ObjectRef,
        owner_uid: Uuid,
    },
    /// A spec reached the reconciler that admission should have rejected.
    InvariantViolation { key: ObjectRef, reason: String },
    /// A store call exceeded its per-call timeout.
    Timeout { operation: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => {
                write!(f, "store error: {err}")
            }
            Self::OwnershipConflict {
                kind,
                key,
                owner_uid,
            } => {
                write!(
                    f,
                    "{kind} '{key}' is controlled by a different owner (uid {owner_uid})"
                )
            }
            Self::InvariantViolation { key, reason } => {
                write!(f, "invariant violation on '{key}': {reason}")
            }
            Self::Timeout { operation } => {
                write!(f, "store call '{operation}' timed out")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl Error {
    /// Create an ownership conflict error.
    pub fn ownership_conflict(kind: Kind, key: ObjectRef, owner_uid: Uuid) -> Self {
        Self::OwnershipConflict {
            kind,
            key,
            owner_uid,
        }
    }

    /// Create an invariant violation error.
    pub fn invariant_violation(key: ObjectRef, reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            key,
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the next retry has a reasonable chance without external
    /// intervention. Ownership conflicts and invariant violations need a
    /// human; they are still retried (level-triggered), just logged louder.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => !matches!(
                err,
                StoreError::NotFound { .. } | StoreError::AlreadyExists { .. }
            ),
            Self::Timeout { .. } => true,
            Self::OwnershipConflict { .. }
            | Self::InvariantViolation { .. }
            | Self::InvalidConfig { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_wrapping() {
        let err: Error = StoreError::unavailable("connection refused").into();
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_ownership_conflict_display() {
        let err = Error::ownership_conflict(
            Kind::NetworkEndpoint,
            ObjectRef::new("prod", "orders"),
            Uuid::nil(),
        );
        assert!(err.to_string().contains("prod/orders"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(Error::timeout("get").is_transient());
        assert!(!Error::invalid_config("zero workers").is_transient());
    }
}
