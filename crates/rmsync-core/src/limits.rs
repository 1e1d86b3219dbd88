//! Node-level and per-credential admission limits, and the scheduler-wide
//! defaults they fall back to.

use serde::{Deserialize, Serialize};

use crate::types::NodeAccessPolicy;

/// Hard limits on a node. Zero means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLimits {
    pub max_jobs: u32,
    pub max_procs: u32,
    /// Max processor-equivalents across all jobs on the node.
    pub max_pe: u32,
}

/// Node-scoped per-credential limits. Zero means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialLimits {
    pub max_job_per_user: u32,
    pub max_proc_per_user: u32,
    pub max_job_per_group: u32,
    pub max_proc_per_group: u32,
    /// Absolute PE count when > 1.0, fraction of node procs when <= 1.0.
    pub max_pe_per_job: f64,
}

/// Scheduler-wide fallbacks passed explicitly into policy code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerDefaults {
    pub access_policy: Option<NodeAccessPolicy>,
    /// Nodes in this partition are always shared.
    pub shared_partition: Option<String>,
    pub node_limits: NodeLimits,
    pub credential_limits: Option<CredentialLimits>,
    /// Cap on the total configured procs accepted across all nodes.
    pub license_proc_limit: Option<u32>,
}

/// Pick the node value when it is set, else the default.
pub fn node_or_default(node: u32, default: u32) -> u32 {
    if node == 0 { default } else { node }
}
