//! Node access (exclusivity) policy resolution and compatibility.
//!
//! Policies only tighten as more specific inputs are supplied: a job request
//! can narrow what the node allows but never widen it past the floor set by
//! the node, partition, or scheduler default.

use rmsync_core::{NodeAccessPolicy, SchedulerDefaults};
use rmsync_state::{ClusterState, Job, Node};
use tracing::debug;

use crate::reason::RejectReason;

/// Compatibility checks only bind when the start time is this close to now.
pub const LOOKAHEAD_SECS: u64 = 3600;

/// Base policy before any job request is considered.
pub fn base_policy(
    node_policy: Option<NodeAccessPolicy>,
    partition_policy: Option<NodeAccessPolicy>,
    default: Option<NodeAccessPolicy>,
) -> Option<NodeAccessPolicy> {
    match partition_policy {
        Some(p) => node_policy.or(Some(p)),
        None => node_policy.or(default),
    }
}

/// Apply a job's requested policy on top of `base`.
pub fn resolve(
    base: Option<NodeAccessPolicy>,
    request: Option<NodeAccessPolicy>,
) -> Option<NodeAccessPolicy> {
    use NodeAccessPolicy::*;

    let Some(req) = request else {
        return base;
    };
    match base {
        None | Some(Shared) => Some(req),
        Some(SharedOnly) | Some(SingleTask) => base,
        Some(SingleUser) | Some(UniqueUser) | Some(SingleGroup) | Some(SingleAccount) => {
            if req == Shared { base } else { Some(req) }
        }
        Some(SingleJob) => {
            if matches!(req, Shared | SingleUser | SingleGroup | SingleAccount) {
                base
            } else {
                Some(req)
            }
        }
    }
}

/// Full resolution for `node`: nodes in the shared partition are always
/// shared, everything else goes through [`base_policy`] and [`resolve`].
pub fn effective_policy(
    node: &Node,
    node_policy: Option<NodeAccessPolicy>,
    partition_policy: Option<NodeAccessPolicy>,
    request: Option<NodeAccessPolicy>,
    defaults: &SchedulerDefaults,
) -> Option<NodeAccessPolicy> {
    if node.partition.is_some() && node.partition == defaults.shared_partition {
        return Some(NodeAccessPolicy::Shared);
    }
    let base = base_policy(node_policy, partition_policy, defaults.access_policy);
    resolve(base, request)
}

/// Recompute the node's stored effective policy from its own, partition,
/// and default policies, folded through every assigned job's request.
pub fn node_effective_policy(
    state: &ClusterState,
    node: &Node,
    defaults: &SchedulerDefaults,
) -> Option<NodeAccessPolicy> {
    let partition_policy = state
        .partition(node.partition.as_deref())
        .and_then(|p| p.access_policy);
    let mut eff = node
        .spec_access_policy
        .or(partition_policy)
        .or(defaults.access_policy);
    for job in state.jobs_on(node) {
        let Some(request) = job.requested_access_policy() else {
            continue;
        };
        eff = effective_policy(node, eff, partition_policy, Some(request), defaults);
    }
    eff
}

/// Check `job` against the jobs already on `node` under `policy`.
pub fn check_access(
    state: &ClusterState,
    node: &Node,
    job: &Job,
    start_time: u64,
    policy: Option<NodeAccessPolicy>,
) -> Result<(), RejectReason> {
    use NodeAccessPolicy::*;

    let Some(policy) = policy else {
        return Ok(());
    };
    let reject = || -> Result<(), RejectReason> {
        debug!(node = %node.id, job = %job.id, %policy, "access policy conflict");
        Err(RejectReason::AccessPolicy(policy))
    };

    match policy {
        Shared => return Ok(()),
        SharedOnly => {
            return match job.requested_access_policy() {
                None | Some(Shared) | Some(SharedOnly) => Ok(()),
                Some(_) => reject(),
            };
        }
        _ => {}
    }

    if start_time > state.now + LOOKAHEAD_SECS {
        return Ok(());
    }

    let creds = &job.credentials;
    let mut others = state.jobs_on(node).filter(|other| other.id != job.id);
    let conflict = match policy {
        SingleUser => others.any(|o| o.credentials.user != creds.user),
        UniqueUser => others.any(|o| o.credentials.user == creds.user),
        SingleGroup => others.any(|o| o.credentials.group != creds.group),
        SingleAccount => others.any(|o| o.credentials.account != creds.account),
        SingleJob => others.any(|o| o.is_active() && !job.is_same_job(o)),
        SingleTask => others.any(|o| o.is_active()),
        Shared | SharedOnly => false,
    };
    if conflict { reject() } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmsync_state::{Credentials, JobState, Partition, Req};
    use NodeAccessPolicy::*;

    fn job(id: &str, user: &str, state: JobState) -> Job {
        Job {
            id: id.to_string(),
            credentials: Credentials {
                user: user.to_string(),
                group: Some(format!("{user}-grp")),
                ..Credentials::default()
            },
            state,
            reqs: vec![Req::default()],
            ..Job::default()
        }
    }

    fn state_with(node_jobs: Vec<Job>) -> ClusterState {
        let mut state = ClusterState::new();
        state.now = 10_000;
        let node = state.upsert_node("n1");
        node.jobs = node_jobs.iter().map(|j| j.id.clone()).collect();
        for j in node_jobs {
            state.jobs.insert(j.id.clone(), j);
        }
        state
    }

    #[test]
    fn base_prefers_node_then_partition_then_default() {
        assert_eq!(base_policy(Some(SingleJob), Some(Shared), Some(SingleTask)), Some(SingleJob));
        assert_eq!(base_policy(None, Some(SingleUser), Some(SingleTask)), Some(SingleUser));
        assert_eq!(base_policy(None, None, Some(SingleTask)), Some(SingleTask));
        assert_eq!(base_policy(None, None, None), None);
    }

    #[test]
    fn precedence_table() {
        assert_eq!(resolve(Some(SingleJob), None), Some(SingleJob));
        assert_eq!(resolve(None, Some(SingleUser)), Some(SingleUser));
        assert_eq!(resolve(Some(Shared), Some(SingleTask)), Some(SingleTask));
        assert_eq!(resolve(Some(SharedOnly), Some(SingleJob)), Some(SharedOnly));
        assert_eq!(resolve(Some(SingleUser), Some(Shared)), Some(SingleUser));
        assert_eq!(resolve(Some(SingleUser), Some(SingleJob)), Some(SingleJob));
        assert_eq!(resolve(Some(SingleJob), Some(SingleUser)), Some(SingleJob));
        assert_eq!(resolve(Some(SingleJob), Some(SingleTask)), Some(SingleTask));
        assert_eq!(resolve(Some(SingleTask), Some(Shared)), Some(SingleTask));
    }

    #[test]
    fn more_restrictive_request_never_loosens() {
        for base in NodeAccessPolicy::ALL {
            for req in NodeAccessPolicy::ALL {
                let out = resolve(Some(base), Some(req)).unwrap();
                if req.restrictiveness() > base.restrictiveness() {
                    assert!(
                        out.restrictiveness() >= base.restrictiveness(),
                        "{base} + {req} -> {out}"
                    );
                }
                if base == SharedOnly {
                    assert_eq!(out, SharedOnly);
                }
            }
        }
    }

    #[test]
    fn shared_partition_is_always_shared() {
        let mut node = Node::new("n1");
        node.partition = Some("shared".into());
        let defaults = SchedulerDefaults {
            shared_partition: Some("shared".into()),
            ..SchedulerDefaults::default()
        };
        assert_eq!(
            effective_policy(&node, Some(SingleTask), None, Some(SingleJob), &defaults),
            Some(Shared)
        );
    }

    #[test]
    fn node_policy_folds_assigned_job_requests() {
        let mut exclusive = job("j1", "alice", JobState::Running);
        exclusive.reqs[0].access_policy = Some(SingleJob);
        let mut state = state_with(vec![exclusive, job("j2", "bob", JobState::Running)]);
        state.partitions.insert(
            "batch".into(),
            Partition { name: "batch".into(), access_policy: Some(Shared) },
        );
        state.node_mut("n1").unwrap().partition = Some("batch".into());
        let node = state.node("n1").unwrap();
        let eff = node_effective_policy(&state, node, &SchedulerDefaults::default());
        assert_eq!(eff, Some(SingleJob));
    }

    #[test]
    fn single_user_rejects_other_user_within_lookahead() {
        let state = state_with(vec![job("j1", "alice", JobState::Running)]);
        let node = state.node("n1").unwrap();
        let bob = job("j2", "bob", JobState::Idle);
        let err = check_access(&state, node, &bob, state.now, Some(SingleUser)).unwrap_err();
        assert_eq!(err.tag(), "singleuser nodeaccesspolicy");
        assert!(check_access(&state, node, &bob, state.now + 7200, Some(SingleUser)).is_ok());

        let alice = job("j3", "alice", JobState::Idle);
        assert!(check_access(&state, node, &alice, state.now, Some(SingleUser)).is_ok());
    }

    #[test]
    fn unique_user_rejects_same_user() {
        let state = state_with(vec![job("j1", "alice", JobState::Running)]);
        let node = state.node("n1").unwrap();
        let alice = job("j2", "alice", JobState::Idle);
        assert!(check_access(&state, node, &alice, state.now, Some(UniqueUser)).is_err());
        let bob = job("j3", "bob", JobState::Idle);
        assert!(check_access(&state, node, &bob, state.now, Some(UniqueUser)).is_ok());
    }

    #[test]
    fn single_job_ignores_inactive_and_alias() {
        let state = state_with(vec![
            job("j1", "alice", JobState::Idle),
            job("j2", "alice", JobState::Running),
        ]);
        let node = state.node("n1").unwrap();
        let mut candidate = job("j2.shadow", "bob", JobState::Idle);
        candidate.actual_job = Some("j2".into());
        assert!(check_access(&state, node, &candidate, state.now, Some(SingleJob)).is_ok());

        let other = job("j9", "bob", JobState::Idle);
        let err = check_access(&state, node, &other, state.now, Some(SingleJob)).unwrap_err();
        assert_eq!(err, RejectReason::AccessPolicy(SingleJob));
    }

    #[test]
    fn single_task_rejects_any_active_job() {
        let state = state_with(vec![job("j1", "alice", JobState::Starting)]);
        let node = state.node("n1").unwrap();
        let alice = job("j2", "alice", JobState::Idle);
        let err = check_access(&state, node, &alice, state.now, Some(SingleTask)).unwrap_err();
        assert_eq!(err.tag(), "singletask nodeaccesspolicy");
    }

    #[test]
    fn shared_only_rejects_exclusive_requests_regardless_of_time() {
        let state = state_with(vec![]);
        let node = state.node("n1").unwrap();
        let mut j = job("j1", "alice", JobState::Idle);
        assert!(check_access(&state, node, &j, state.now, Some(SharedOnly)).is_ok());
        j.reqs[0].access_policy = Some(SingleJob);
        let err = check_access(&state, node, &j, state.now + 99_999, Some(SharedOnly)).unwrap_err();
        assert_eq!(err.tag(), "shared nodeaccesspolicy");
    }

    #[test]
    fn single_group_rejects_other_group() {
        let state = state_with(vec![job("j1", "alice", JobState::Running)]);
        let node = state.node("n1").unwrap();
        let bob = job("j2", "bob", JobState::Idle);
        let err = check_access(&state, node, &bob, state.now, Some(SingleGroup)).unwrap_err();
        assert_eq!(err.tag(), "singlegroup nodeaccesspolicy");
    }

    #[test]
    fn single_account_rejects_other_account() {
        let mut alice = job("j1", "alice", JobState::Running);
        alice.credentials.account = Some("physics".into());
        let state = state_with(vec![alice]);
        let node = state.node("n1").unwrap();

        let mut bob = job("j2", "bob", JobState::Idle);
        bob.credentials.account = Some("chem".into());
        let err = check_access(&state, node, &bob, state.now, Some(SingleAccount)).unwrap_err();
        assert_eq!(err, RejectReason::AccessPolicy(SingleAccount));

        bob.credentials.account = Some("physics".into());
        assert!(check_access(&state, node, &bob, state.now, Some(SingleAccount)).is_ok());
    }

    #[test]
    fn unique_user_and_single_task_bind_only_within_lookahead() {
        let state = state_with(vec![job("j1", "alice", JobState::Running)]);
        let node = state.node("n1").unwrap();
        let alice = job("j2", "alice", JobState::Idle);
        let edge = state.now + LOOKAHEAD_SECS;

        for policy in [UniqueUser, SingleTask] {
            assert!(check_access(&state, node, &alice, edge, Some(policy)).is_err(), "{policy}");
            assert!(check_access(&state, node, &alice, edge + 1, Some(policy)).is_ok(), "{policy}");
        }
    }
}
