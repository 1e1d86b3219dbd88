//! rmsync-placement — node admission control.
//!
//! Decides node *eligibility* for a candidate job; job ordering lives
//! elsewhere.
//!
//! # Components
//!
//! - **`access`**: effective node access policy and job compatibility
//! - **`pe`**: processor-equivalent math
//! - **`admission`**: limit enforcement and task-count bounds
//! - **`reason`**: stable rejection tags

pub mod access;
pub mod admission;
pub mod pe;
pub mod reason;

pub use access::{
    LOOKAHEAD_SECS, base_policy, check_access, effective_policy, node_effective_policy, resolve,
};
pub use admission::{Admission, AdmissionEnforcer};
pub use pe::{job_pe, pe_per_task, pe_ratio};
pub use reason::RejectReason;
