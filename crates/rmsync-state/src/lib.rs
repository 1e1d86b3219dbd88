//! rmsync-state — the scheduler's in-memory cluster model.
//!
//! Holds the resource-manager registry (in registration order), the node and
//! job tables, partitions, the global generic-resource pool, and queue
//! classes. Only the poll cycle mutates it; policy code reads borrowed
//! snapshots.

pub mod cluster;
pub mod error;
pub mod registry;
pub mod types;

pub use cluster::{ClusterState, GlobalResources, QueueClass};
pub use error::{StateError, StateResult};
pub use registry::{FailureLog, FailureRecord, ResourceManager, RmFlags};
pub use types::*;
