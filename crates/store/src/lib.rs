//! Versioned resource store interface and in-memory backend.
//!
//! The store is the only shared mutable resource in the system. All
//! mutation goes through optimistic-concurrency primitives: creates
//! fail on duplicates, updates and deletes are keyed on a resource
//! version, and every change is published on a broadcast watch stream.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod memory;
pub mod store;

// Re-export main types
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use store::{EventType, ResourceStore, TracingStore, WatchEvent, WatchSubscription};
