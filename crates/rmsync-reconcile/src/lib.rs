//! rmsync-reconcile — merges per-RM node state reports into one effective
//! node state.
//!
//! RMs are consulted in registration order. The first non-provisioning RM
//! with an opinion seeds the result; every later RM with a different opinion
//! is folded in with that RM's merge policy. Provisioning RMs only seed when
//! no other RM reports the node.

use rmsync_core::{NodeState, NodeStatePolicy, RmKind};
use rmsync_state::{ClusterState, Node, ResourceManager};
use tracing::debug;

/// Reconcile the node `id` against the registry in `state`.
///
/// Returns [`NodeState::None`] when the node is unknown; callers treat that
/// as "do not schedule" rather than an error.
pub fn reconcile_node(state: &ClusterState, id: &str) -> NodeState {
    let Ok(node) = state.node(id) else {
        return NodeState::None;
    };
    let provisioning = state
        .jobs_on(node)
        .any(|job| job.is_os_provision() && job.is_active());
    reconcile(node, state.rms(), provisioning)
}

/// Merge `node`'s raw RM states. `os_provisioning` is true when an OS
/// provisioning system job is in flight on the node.
pub fn reconcile(node: &Node, rms: &[ResourceManager], os_provisioning: bool) -> NodeState {
    let reported = |rm: &ResourceManager| {
        node.rm_states
            .get(&rm.name)
            .copied()
            .filter(|s| *s != NodeState::None)
    };

    // ── Seed ──

    let mut provisioning_seed = None;
    let mut seed = None;
    for (index, rm) in rms.iter().enumerate() {
        if !rm.is_real() {
            continue;
        }
        let Some(value) = reported(rm) else { continue };
        if rm.kind == RmKind::Provisioning {
            provisioning_seed = Some(value);
            continue;
        }
        seed = Some((index, value));
        break;
    }

    let mut effective = match (seed, provisioning_seed) {
        (Some((_, value)), _) => value,
        (None, Some(value)) => value,
        (None, None) => {
            debug!(node = %node.id, "no rm reports state");
            return NodeState::None;
        }
    };

    // ── Merge ──

    if let Some((seed_index, _)) = seed {
        for rm in &rms[seed_index + 1..] {
            if !rm.is_real() || rm.kind == RmKind::Provisioning {
                continue;
            }
            let Some(value) = reported(rm) else { continue };
            if value == effective {
                continue;
            }
            let policy = rm.node_state_policy.unwrap_or(if node.multi_compute_rm {
                NodeStatePolicy::Optimistic
            } else {
                NodeStatePolicy::Pessimistic
            });
            let merged = merge(policy, effective, value);
            debug!(
                node = %node.id,
                rm = %rm.name,
                ?policy,
                from = %effective,
                reported = %value,
                to = %merged,
                "merged rm node state"
            );
            effective = merged;
        }
    }

    // ── Overrides ──

    if !effective.is_up() && os_provisioning {
        effective = NodeState::Active;
    }
    if effective == NodeState::Up {
        effective = NodeState::Idle;
    }
    effective
}

/// Fold one reported value into the running effective value.
pub fn merge(policy: NodeStatePolicy, effective: NodeState, reported: NodeState) -> NodeState {
    let take_reported = match policy {
        NodeStatePolicy::Optimistic => {
            reported == NodeState::Idle
                || (reported.is_active() && effective != NodeState::Idle)
                || (reported.is_up() && !effective.is_up())
        }
        NodeStatePolicy::Pessimistic => {
            effective == NodeState::Idle
                || (effective.is_active() && reported != NodeState::Idle)
                || (effective.is_up() && !reported.is_up())
        }
    };
    if take_reported { reported } else { effective }
}
