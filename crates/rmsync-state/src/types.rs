//! Node, job, and partition records.

use std::collections::BTreeMap;

use rmsync_core::{
    CredentialLimits, NodeAccessPolicy, NodeLimits, NodeState, Resources, SystemJobKind,
};
use serde::{Deserialize, Serialize};

pub type NodeId = String;
pub type JobId = String;
pub type RmName = String;

// ── Node ──────────────────────────────────────────────────────────

/// One schedulable resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub partition: Option<String>,
    pub configured: Resources,
    pub available: Resources,
    /// Rebuilt from active jobs at the start of every workload pass.
    pub dedicated: Resources,
    /// Raw state per reporting RM. Order comes from the registry, not the map.
    pub rm_states: BTreeMap<RmName, NodeState>,
    /// Reconciled state.
    pub state: NodeState,
    /// Administrator pin; reconciliation is skipped while set.
    pub spec_state: Option<NodeState>,
    pub spec_access_policy: Option<NodeAccessPolicy>,
    pub eff_access_policy: Option<NodeAccessPolicy>,
    pub limits: NodeLimits,
    pub policy: Option<CredentialLimits>,
    /// Jobs assigned to this node, in the order they were attached.
    pub jobs: Vec<JobId>,
    /// RM messages waiting for the next node visit.
    pub pending_messages: Vec<String>,
    pub messages: Vec<String>,
    pub multi_compute_rm: bool,
    /// Not yet initialized by a node visit.
    pub is_new: bool,
    pub last_update_iteration: Option<u64>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            is_new: true,
            ..Self::default()
        }
    }

    /// The policy that seeds admission-time resolution.
    pub fn stored_access_policy(&self) -> Option<NodeAccessPolicy> {
        self.eff_access_policy.or(self.spec_access_policy)
    }
}

// ── Job ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Starting,
    Running,
    Suspended,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qos {
    pub name: String,
    /// Exempt from node-level resource limits.
    #[serde(default)]
    pub dedicated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub qos: Option<Qos>,
}

/// One sub-request of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Req {
    pub per_task: Resources,
    #[serde(default)]
    pub task_count: u32,
    #[serde(default)]
    pub access_policy: Option<NodeAccessPolicy>,
}

/// Tasks of one req placed on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAllocation {
    pub node: NodeId,
    #[serde(default)]
    pub req: usize,
    pub tasks: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// The job this one stands in for, if any.
    #[serde(default)]
    pub actual_job: Option<JobId>,
    pub credentials: Credentials,
    #[serde(default)]
    pub state: JobState,
    pub reqs: Vec<Req>,
    #[serde(default)]
    pub task_map: Vec<TaskAllocation>,
    #[serde(default)]
    pub system: Option<SystemJobKind>,
    #[serde(default)]
    pub rm: Option<RmName>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        matches!(self.state, JobState::Starting | JobState::Running)
    }

    pub fn primary_req(&self) -> Option<&Req> {
        self.reqs.first()
    }

    /// Access policy requested by the primary req.
    pub fn requested_access_policy(&self) -> Option<NodeAccessPolicy> {
        self.primary_req().and_then(|r| r.access_policy)
    }

    pub fn is_dedicated(&self) -> bool {
        self.credentials.qos.as_ref().is_some_and(|q| q.dedicated)
    }

    pub fn is_os_provision(&self) -> bool {
        self.system == Some(SystemJobKind::OsProvision)
    }

    /// `(req index, tasks)` pairs placed on `node`.
    pub fn allocations_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = (usize, u32)> + 'a {
        self.task_map
            .iter()
            .filter(move |a| a.node == node)
            .map(|a| (a.req, a.tasks))
    }

    /// True when `other` names this job or its stand-in.
    pub fn is_same_job(&self, other: &Job) -> bool {
        other.id == self.id || self.actual_job.as_deref() == Some(other.id.as_str())
    }
}

// ── Partition ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub access_policy: Option<NodeAccessPolicy>,
}
