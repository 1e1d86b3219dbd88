//! Post-cluster-pass node visitation.

use rmsync_core::{RmKind, SchedulerDefaults};
use rmsync_placement::node_effective_policy;
use rmsync_reconcile::reconcile_node;
use rmsync_state::ClusterState;
use tracing::{debug, info, warn};

use crate::apply::Reporters;
use crate::report::IterationReport;

/// Visit every node reported this iteration, in id order.
///
/// Nodes reported only by RMs that failed are not visited and keep their
/// last-known state.
pub fn visit_nodes(
    state: &mut ClusterState,
    reporters: &Reporters,
    defaults: &SchedulerDefaults,
    report: &mut IterationReport,
) {
    let iteration = state.iteration;
    let mut licensed_procs: u64 = 0;

    for (id, rms) in reporters {
        let compute_reporters = rms
            .iter()
            .filter(|name| state.rm(name).is_some_and(|rm| rm.kind == RmKind::Compute))
            .count();

        let Some(node) = state.nodes.get_mut(id) else {
            continue;
        };
        node.multi_compute_rm = compute_reporters > 1;

        if let Some(limit) = defaults.license_proc_limit {
            let procs = u64::from(node.configured.procs);
            if licensed_procs + procs > u64::from(limit) {
                warn!(node = %id, procs, limit, "license proc limit exceeded, node resources cleared");
                node.configured.clear();
                node.available.clear();
            } else {
                licensed_procs += procs;
            }
        }

        node.messages = std::mem::take(&mut node.pending_messages);
        let pinned = node.spec_state;

        let effective = match pinned {
            Some(s) => s,
            None => reconcile_node(state, id),
        };

        let Some(node) = state.nodes.get_mut(id) else {
            continue;
        };
        if node.state != effective {
            debug!(node = %id, from = node.state.name(), to = effective.name(), "node state changed");
        }
        node.state = effective;
        if node.is_new {
            node.is_new = false;
            info!(node = %id, state = effective.name(), "node initialized");
            report.new_nodes.push(id.clone());
        }
        node.last_update_iteration = Some(iteration);
        report.visited_nodes += 1;
    }
}

/// Recompute each node's stored effective access policy.
pub fn refresh_access_policies(state: &mut ClusterState, defaults: &SchedulerDefaults) {
    let updates: Vec<_> = state
        .nodes
        .values()
        .map(|node| (node.id.clone(), node_effective_policy(state, node, defaults)))
        .collect();
    for (id, eff) in updates {
        if let Some(node) = state.nodes.get_mut(&id) {
            node.eff_access_policy = eff;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmsync_core::{NodeAccessPolicy, NodeState, Resources};
    use rmsync_state::{Job, JobState, Req, ResourceManager, TaskAllocation};

    fn state() -> ClusterState {
        let mut state = ClusterState::new();
        state.register_rm(ResourceManager::new("pbs", RmKind::Compute)).unwrap();
        state.register_rm(ResourceManager::new("slurm", RmKind::Compute)).unwrap();
        state.advance(100);
        state
    }

    fn reported(state: &mut ClusterState, id: &str, by: &[(&str, NodeState)]) -> Reporters {
        let node = state.upsert_node(id);
        for (rm, s) in by {
            node.rm_states.insert(rm.to_string(), *s);
        }
        let mut reporters = Reporters::new();
        reporters.insert(id.to_string(), by.iter().map(|(rm, _)| rm.to_string()).collect());
        reporters
    }

    #[test]
    fn new_node_is_initialized_once() {
        let mut state = state();
        let reporters = reported(&mut state, "n1", &[("pbs", NodeState::Idle)]);
        let defaults = SchedulerDefaults::default();

        let mut first = IterationReport::default();
        visit_nodes(&mut state, &reporters, &defaults, &mut first);
        assert_eq!(first.new_nodes, vec!["n1"]);
        assert_eq!(state.node("n1").unwrap().state, NodeState::Idle);
        assert_eq!(state.node("n1").unwrap().last_update_iteration, Some(1));

        state.advance(200);
        let mut second = IterationReport::default();
        visit_nodes(&mut state, &reporters, &defaults, &mut second);
        assert!(second.new_nodes.is_empty());
        assert_eq!(second.visited_nodes, 1);
    }

    #[test]
    fn two_compute_reporters_mark_multi_rm() {
        let mut state = state();
        let reporters = reported(
            &mut state,
            "n1",
            &[("pbs", NodeState::Idle), ("slurm", NodeState::Down)],
        );
        visit_nodes(&mut state, &reporters, &SchedulerDefaults::default(), &mut IterationReport::default());
        let node = state.node("n1").unwrap();
        assert!(node.multi_compute_rm);
        // Optimistic merge: idle over down.
        assert_eq!(node.state, NodeState::Idle);
    }

    #[test]
    fn specified_state_pins_node() {
        let mut state = state();
        let reporters = reported(&mut state, "n1", &[("pbs", NodeState::Idle)]);
        state.upsert_node("n1").spec_state = Some(NodeState::Drained);
        visit_nodes(&mut state, &reporters, &SchedulerDefaults::default(), &mut IterationReport::default());
        assert_eq!(state.node("n1").unwrap().state, NodeState::Drained);
    }

    #[test]
    fn pending_messages_replace_previous() {
        let mut state = state();
        let reporters = reported(&mut state, "n1", &[("pbs", NodeState::Idle)]);
        let node = state.upsert_node("n1");
        node.messages = vec!["stale".into()];
        node.pending_messages = vec!["fresh".into()];
        visit_nodes(&mut state, &reporters, &SchedulerDefaults::default(), &mut IterationReport::default());
        let node = state.node("n1").unwrap();
        assert_eq!(node.messages, vec!["fresh"]);
        assert!(node.pending_messages.is_empty());
    }

    #[test]
    fn license_proc_limit_clears_overflowing_nodes() {
        let mut state = state();
        let mut reporters = reported(&mut state, "a", &[("pbs", NodeState::Idle)]);
        reporters.extend(reported(&mut state, "b", &[("pbs", NodeState::Idle)]));
        state.upsert_node("a").configured = Resources::procs(8);
        state.upsert_node("b").configured = Resources::procs(8);
        let defaults = SchedulerDefaults {
            license_proc_limit: Some(12),
            ..SchedulerDefaults::default()
        };
        visit_nodes(&mut state, &reporters, &defaults, &mut IterationReport::default());
        assert_eq!(state.node("a").unwrap().configured.procs, 8);
        assert_eq!(state.node("b").unwrap().configured.procs, 0);
    }

    #[test]
    fn access_policy_refresh_folds_job_requests() {
        let mut state = state();
        state.upsert_node("n1").spec_access_policy = Some(NodeAccessPolicy::Shared);
        let job = Job {
            id: "j1".into(),
            state: JobState::Running,
            reqs: vec![Req {
                per_task: Resources::procs(1),
                task_count: 1,
                access_policy: Some(NodeAccessPolicy::SingleJob),
            }],
            task_map: vec![TaskAllocation { node: "n1".into(), req: 0, tasks: 1 }],
            ..Job::default()
        };
        state.jobs.insert("j1".into(), job);
        state.upsert_node("n1").jobs.push("j1".into());

        refresh_access_policies(&mut state, &SchedulerDefaults::default());
        assert_eq!(
            state.node("n1").unwrap().eff_access_policy,
            Some(NodeAccessPolicy::SingleJob)
        );
    }
}
