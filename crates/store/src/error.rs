//! Error types for the store crate.

use steward_api::Kind;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("{kind} '{namespace}/{name}' already exists")]
    AlreadyExists {
        kind: Kind,
        namespace: String,
        name: String,
    },

    #[error("version conflict on {kind} '{namespace}/{name}': expected {expected}, current {current}")]
    Conflict {
        kind: Kind,
        namespace: String,
        name: String,
        expected: u64,
        current: u64,
    },

    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("watch stream lagged, {skipped} events dropped")]
    WatchLagged { skipped: u64 },

    #[error("watch stream closed")]
    WatchClosed,
}

impl StoreError {
    /// Create a not found error.
    pub fn not_found(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(
        kind: Kind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Benign absence: nothing to read or delete.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Optimistic-concurrency collision: re-fetch and retry the pass.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Create raced with an earlier pass: re-fetch and verify instead.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found(Kind::WorkloadReplicaSet, "prod", "orders");
        assert!(err.to_string().contains("WorkloadReplicaSet"));
        assert!(err.to_string().contains("prod/orders"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        let err = StoreError::Conflict {
            kind: Kind::Microservice,
            namespace: "prod".to_string(),
            name: "orders".to_string(),
            expected: 3,
            current: 5,
        };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("expected 3"));
    }
}
