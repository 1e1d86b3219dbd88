//! rmsync-poll — keeps the cluster model in step with every registered
//! resource manager.
//!
//! # Iteration
//!
//! ```text
//! PollOrchestrator::run_iteration
//!   ├── cluster pass   (per RM, bounded by its timeout)
//!   │   ├── apply report → node slots, gres, contact times
//!   │   └── on failure   → FailureLog, health, license flush
//!   ├── node visit      (reported nodes: reconcile, init, messages)
//!   ├── queue pass
//!   ├── workload pass   (+ deferred static pass when new jobs appeared)
//!   └── rebuild node job lists, dedicated resources, access policies
//! ```
//!
//! Backends plug in through [`ResourceManagerDriver`]. A driver that hangs
//! past its RM's timeout is abandoned and recorded as a timeout; the
//! iteration moves on to the next RM.

pub mod apply;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod timed;
pub mod visit;

pub use driver::{
    ClusterReport, DriverError, DriverResult, GresReport, NodeReport, QueueReport,
    ResourceManagerDriver, WorkloadReport,
};
pub use error::{PollError, PollResult};
pub use orchestrator::PollOrchestrator;
pub use report::{IterationReport, PollEvent};
pub use timed::{CallOutcome, call_with_timeout};
