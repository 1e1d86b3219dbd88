//! Machine-stable admission rejection reasons.

use std::fmt;

use rmsync_core::{NodeAccessPolicy, NodeState};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The job has no primary req.
    InvalidRequest,
    MaxJobPerNode,
    MaxPePerNode,
    MaxPePerJob,
    MaxJobPerGroup,
    MaxJobPerUser,
    MaxProcPerUser,
    MaxProcPerGroup,
    MaxProcPerNode,
    NodeState(NodeState),
    AccessPolicy(NodeAccessPolicy),
    InadequateTasks,
}

impl RejectReason {
    pub fn tag(&self) -> String {
        match self {
            RejectReason::InvalidRequest => "invalid request".to_string(),
            RejectReason::MaxJobPerNode => "MaxJobPerNode".to_string(),
            RejectReason::MaxPePerNode => "MaxPEPerNode".to_string(),
            RejectReason::MaxPePerJob => "MaxPEPerJob".to_string(),
            RejectReason::MaxJobPerGroup => "MaxJobPerGroup".to_string(),
            RejectReason::MaxJobPerUser => "MaxJobPerUser".to_string(),
            RejectReason::MaxProcPerUser => "MaxProcPerUser".to_string(),
            RejectReason::MaxProcPerGroup => "MaxProcPerGroup".to_string(),
            RejectReason::MaxProcPerNode => "MaxProcPerNode".to_string(),
            RejectReason::NodeState(state) => format!("node state is {state}"),
            // SharedOnly nodes report under the shared tag.
            RejectReason::AccessPolicy(NodeAccessPolicy::SharedOnly) => {
                "shared nodeaccesspolicy".to_string()
            }
            RejectReason::AccessPolicy(policy) => format!("{policy} nodeaccesspolicy"),
            RejectReason::InadequateTasks => "inadequate tasks".to_string(),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl Serialize for RejectReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(RejectReason::MaxPePerNode.tag(), "MaxPEPerNode");
        assert_eq!(
            RejectReason::NodeState(NodeState::Active).tag(),
            "node state is Running"
        );
        assert_eq!(
            RejectReason::NodeState(NodeState::Down).tag(),
            "node state is Down"
        );
        assert_eq!(
            RejectReason::AccessPolicy(NodeAccessPolicy::SingleUser).tag(),
            "singleuser nodeaccesspolicy"
        );
        assert_eq!(
            RejectReason::AccessPolicy(NodeAccessPolicy::SharedOnly).tag(),
            "shared nodeaccesspolicy"
        );
    }

    #[test]
    fn serializes_as_tag() {
        let json = serde_json::to_string(&RejectReason::InadequateTasks).unwrap();
        assert_eq!(json, "\"inadequate tasks\"");
    }
}
