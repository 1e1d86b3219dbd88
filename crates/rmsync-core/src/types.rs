//! Closed value sets shared across rmsync crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Availability state of a node, as reported by an RM or as reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// No information.
    #[default]
    None,
    Down,
    Idle,
    Busy,
    Active,
    Draining,
    Drained,
    Flush,
    Reserved,
    Unknown,
    /// RM-only "alive" state; collapsed to `Idle` after reconciliation.
    Up,
}

impl NodeState {
    /// The node can run work in this state.
    pub fn is_up(self) -> bool {
        matches!(
            self,
            NodeState::Idle
                | NodeState::Busy
                | NodeState::Active
                | NodeState::Draining
                | NodeState::Up
        )
    }

    /// The node has work running on it in this state.
    pub fn is_active(self) -> bool {
        matches!(self, NodeState::Busy | NodeState::Active | NodeState::Draining)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeState::None => "None",
            NodeState::Down => "Down",
            NodeState::Idle => "Idle",
            NodeState::Busy => "Busy",
            NodeState::Active => "Running",
            NodeState::Draining => "Draining",
            NodeState::Drained => "Drained",
            NodeState::Flush => "Flush",
            NodeState::Reserved => "Reserved",
            NodeState::Unknown => "Unknown",
            NodeState::Up => "Up",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeState {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_lowercase().as_str() {
            "none" => NodeState::None,
            "down" => NodeState::Down,
            "idle" => NodeState::Idle,
            "busy" => NodeState::Busy,
            "active" | "running" => NodeState::Active,
            "draining" => NodeState::Draining,
            "drained" => NodeState::Drained,
            "flush" => NodeState::Flush,
            "reserved" => NodeState::Reserved,
            "unknown" => NodeState::Unknown,
            "up" => NodeState::Up,
            other => return Err(ConfigError::InvalidValue {
                field: "node state",
                value: other.to_string(),
            }),
        };
        Ok(state)
    }
}

/// Node access (exclusivity) policy.
///
/// "Unset" is expressed as `Option::None` by callers; every variant here is
/// an explicit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAccessPolicy {
    Shared,
    SharedOnly,
    SingleUser,
    UniqueUser,
    SingleGroup,
    SingleAccount,
    SingleJob,
    SingleTask,
}

impl NodeAccessPolicy {
    /// Position in the exclusivity lattice. Higher is more restrictive.
    pub fn restrictiveness(self) -> u8 {
        match self {
            NodeAccessPolicy::Shared => 1,
            NodeAccessPolicy::SharedOnly => 2,
            NodeAccessPolicy::SingleUser
            | NodeAccessPolicy::UniqueUser
            | NodeAccessPolicy::SingleGroup
            | NodeAccessPolicy::SingleAccount => 3,
            NodeAccessPolicy::SingleJob => 4,
            NodeAccessPolicy::SingleTask => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeAccessPolicy::Shared => "shared",
            NodeAccessPolicy::SharedOnly => "sharedonly",
            NodeAccessPolicy::SingleUser => "singleuser",
            NodeAccessPolicy::UniqueUser => "uniqueuser",
            NodeAccessPolicy::SingleGroup => "singlegroup",
            NodeAccessPolicy::SingleAccount => "singleaccount",
            NodeAccessPolicy::SingleJob => "singlejob",
            NodeAccessPolicy::SingleTask => "singletask",
        }
    }

    pub const ALL: [NodeAccessPolicy; 8] = [
        NodeAccessPolicy::Shared,
        NodeAccessPolicy::SharedOnly,
        NodeAccessPolicy::SingleUser,
        NodeAccessPolicy::UniqueUser,
        NodeAccessPolicy::SingleGroup,
        NodeAccessPolicy::SingleAccount,
        NodeAccessPolicy::SingleJob,
        NodeAccessPolicy::SingleTask,
    ];
}

impl fmt::Display for NodeAccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeAccessPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        NodeAccessPolicy::ALL
            .into_iter()
            .find(|p| p.name() == needle)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "node access policy",
                value: s.to_string(),
            })
    }
}

/// Role an RM plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RmKind {
    #[default]
    Compute,
    Provisioning,
    Storage,
    License,
    /// Informational only; never queried for cluster resources.
    Info,
    /// Another scheduler acting as an RM.
    Peer,
}

impl fmt::Display for RmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RmKind::Compute => "compute",
            RmKind::Provisioning => "provisioning",
            RmKind::Storage => "storage",
            RmKind::License => "license",
            RmKind::Info => "info",
            RmKind::Peer => "peer",
        };
        f.write_str(s)
    }
}

/// Health of an RM interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RmState {
    Active,
    #[default]
    Configured,
    Corrupt,
    Disabled,
    Down,
}

/// How conflicting node states from several RMs are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatePolicy {
    /// Most available reported state wins.
    Optimistic,
    /// Least available reported state wins.
    Pessimistic,
}

/// Query operations a driver may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ClusterQuery,
    WorkloadQuery,
    QueueQuery,
    InfoQuery,
    SystemQuery,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::ClusterQuery => "cluster_query",
            Capability::WorkloadQuery => "workload_query",
            Capability::QueueQuery => "queue_query",
            Capability::InfoQuery => "info_query",
            Capability::SystemQuery => "system_query",
        };
        f.write_str(s)
    }
}

/// Outcome code attached to a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    NoError,
    BadParam,
    BadRequest,
    BadResponse,
    SysFailure,
    NoAuth,
    RemoteFailure,
    RemoteFailureTransient,
    Timeout,
}

impl StatusCode {
    /// Codes that mean the interface itself is broken rather than unreachable.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            StatusCode::BadParam
                | StatusCode::BadRequest
                | StatusCode::BadResponse
                | StatusCode::SysFailure
                | StatusCode::NoAuth
        )
    }

    pub fn is_unreachable(self) -> bool {
        matches!(
            self,
            StatusCode::RemoteFailure | StatusCode::RemoteFailureTransient | StatusCode::Timeout
        )
    }
}

/// Kind of scheduler-internal system job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemJobKind {
    OsProvision,
    VmMigrate,
    Generic,
}
