//! The contract every resource-manager driver satisfies.
//!
//! Drivers never touch the cluster model. Each query returns a complete
//! report that the orchestrator applies after the call finishes, so a call
//! abandoned at its deadline leaves no partial writes behind. Drivers must
//! tolerate being dropped mid-call.

use async_trait::async_trait;
use rmsync_core::{
    Capability, CredentialLimits, NodeAccessPolicy, NodeLimits, NodeState, Resources, StatusCode,
};
use rmsync_state::Job;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

/// Failure returned by a driver call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {}", .message.as_deref().unwrap_or("no message"))]
pub struct DriverError {
    pub code: StatusCode,
    pub message: Option<String>,
}

impl DriverError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn silent(code: StatusCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn unsupported() -> Self {
        Self::new(StatusCode::BadRequest, "operation not supported")
    }
}

/// One node as seen by one RM. `None` fields leave the model untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: String,
    pub state: NodeState,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub configured: Option<Resources>,
    #[serde(default)]
    pub available: Option<Resources>,
    #[serde(default)]
    pub access_policy: Option<NodeAccessPolicy>,
    #[serde(default)]
    pub limits: Option<NodeLimits>,
    #[serde(default)]
    pub policy: Option<CredentialLimits>,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl NodeReport {
    pub fn new(id: impl Into<String>, state: NodeState) -> Self {
        Self {
            id: id.into(),
            state,
            ..Self::default()
        }
    }
}

/// A cluster-wide generic resource pool (e.g. a license count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GresReport {
    pub name: String,
    pub configured: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    /// `-1` means the request is still pending; reuse the last count.
    pub node_count: i64,
    pub nodes: Vec<NodeReport>,
    #[serde(default)]
    pub gres: Vec<GresReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadReport {
    /// `-1` means pending; reuse the last count.
    pub job_count: i64,
    /// `-1` means pending; reuse and reset the stored new-job count.
    pub new_count: i64,
    /// Full snapshot of this RM's jobs.
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueReport {
    pub classes: Vec<String>,
}

/// A backend connection. Unimplemented queries default to "unsupported"
/// and must be left out of [`capabilities`](Self::capabilities).
#[async_trait]
pub trait ResourceManagerDriver: Send + Sync {
    fn capabilities(&self) -> Vec<Capability>;

    async fn cluster_query(&self) -> DriverResult<ClusterReport> {
        Err(DriverError::unsupported())
    }

    async fn workload_query(&self) -> DriverResult<WorkloadReport> {
        Err(DriverError::unsupported())
    }

    async fn queue_query(&self) -> DriverResult<QueueReport> {
        Err(DriverError::unsupported())
    }
}
