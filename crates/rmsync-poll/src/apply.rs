//! Applying driver reports and failures to the cluster model.
//!
//! Everything here runs under the state write lock after a driver call has
//! returned, never during one.

use std::collections::{BTreeMap, BTreeSet};

use rmsync_core::{Capability, RmState, StatusCode};
use rmsync_state::{
    ClusterState, FailureRecord, NodeId, QueueClass, RmName, StateResult,
};
use tracing::{debug, warn};

use crate::driver::{ClusterReport, QueueReport, WorkloadReport};

/// Nodes reported during the cluster pass, with the RMs that reported them.
pub type Reporters = BTreeMap<NodeId, Vec<RmName>>;

/// Counts credited to an RM by one workload query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadTally {
    pub job_count: u32,
    pub new_count: u32,
}

fn clamp_count(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Write one RM's cluster report into the model. Returns the RM's node count.
pub fn apply_cluster_report(
    state: &mut ClusterState,
    rm: &str,
    report: ClusterReport,
    reporters: &mut Reporters,
) -> StateResult<u32> {
    for nr in report.nodes {
        let node = state.upsert_node(&nr.id);
        node.rm_states.insert(rm.to_string(), nr.state);
        if nr.partition.is_some() {
            node.partition = nr.partition;
        }
        if let Some(configured) = nr.configured {
            node.configured = configured;
        }
        if let Some(available) = nr.available {
            node.available = available;
        }
        if nr.access_policy.is_some() {
            node.spec_access_policy = nr.access_policy;
        }
        if let Some(limits) = nr.limits {
            node.limits = limits;
        }
        if nr.policy.is_some() {
            node.policy = nr.policy;
        }
        node.pending_messages.extend(nr.messages);
        let slot = reporters.entry(nr.id).or_default();
        if !slot.iter().any(|r| r == rm) {
            slot.push(rm.to_string());
        }
    }

    for g in report.gres {
        state.gres.configured.insert(g.name.clone(), g.configured);
        state.gres.available.insert(g.name.clone(), g.available);
        state.gres.owner.insert(g.name, rm.to_string());
    }

    let now = state.now;
    let entry = state.rm_mut(rm)?;
    entry.first_contact = true;
    entry.last_contact = Some(now);
    if report.node_count >= 0 {
        entry.node_count = clamp_count(report.node_count);
    }
    // A corrupt RM that was not reset beforehand (a peer) stays corrupt.
    if entry.state != RmState::Corrupt {
        entry.state = RmState::Active;
    }
    entry.failures.clear_message();
    Ok(entry.node_count)
}

/// Record a failed call as a system failure. `cause` is the driver's own
/// code (`Timeout` for an expired deadline); only cluster-query failures
/// turn it into an RM health change.
pub fn record_failure(
    state: &mut ClusterState,
    rm: &str,
    function: Capability,
    cause: StatusCode,
    message: String,
) -> StateResult<()> {
    let (now, iteration) = (state.now, state.iteration);
    let entry = state.rm_mut(rm)?;
    entry.failures.record(FailureRecord {
        time: now,
        iteration,
        function,
        code: StatusCode::SysFailure,
        cause,
        message,
    });
    if function == Capability::ClusterQuery {
        let next = if cause.is_structural() {
            Some(RmState::Corrupt)
        } else if cause.is_unreachable() {
            Some(RmState::Down)
        } else {
            None
        };
        if let Some(next) = next.filter(|s| *s != entry.state) {
            warn!(rm = %rm, from = ?entry.state, to = ?next, "resource manager health changed");
            entry.state = next;
        }
    }
    Ok(())
}

/// Zero a failed license RM's global resources when it asks for that.
/// Returns the resource names flushed.
pub fn flush_license_resources(state: &mut ClusterState, rm: &str) -> Vec<String> {
    let Some(entry) = state.rm(rm) else {
        return Vec::new();
    };
    if !(entry.is_license_source() && entry.flags.flush_resources_when_down) {
        return Vec::new();
    }
    let flushed = state.gres.flush_owned_by(rm);
    if !flushed.is_empty() {
        warn!(rm = %rm, resources = ?flushed, "license resources flushed");
    }
    flushed
}

pub fn apply_queue_report(state: &mut ClusterState, rm: &str, report: QueueReport) -> StateResult<u32> {
    let count = report.classes.len();
    for name in report.classes {
        state.classes.insert(
            name.clone(),
            QueueClass {
                name,
                rm: rm.to_string(),
            },
        );
    }
    let entry = state.rm_mut(rm)?;
    entry.class_count = u32::try_from(count).unwrap_or(u32::MAX);
    Ok(entry.class_count)
}

/// Replace this RM's jobs with the reported snapshot. A pending report
/// (`job_count == -1`) keeps the RM's last-known jobs and task maps.
pub fn apply_workload_report(
    state: &mut ClusterState,
    rm: &str,
    report: WorkloadReport,
) -> StateResult<WorkloadTally> {
    let entry = state.rm_mut(rm)?;
    let pending = report.job_count < 0;
    if !pending {
        entry.job_count = clamp_count(report.job_count);
    }
    let new_count = if report.new_count >= 0 {
        entry.job_new_count = clamp_count(report.new_count);
        entry.job_new_count
    } else {
        std::mem::take(&mut entry.job_new_count)
    };
    let tally = WorkloadTally {
        job_count: entry.job_count,
        new_count,
    };

    if pending {
        debug!(rm = %rm, jobs = tally.job_count, "workload pending, keeping last-known jobs");
        return Ok(tally);
    }

    let reported: BTreeSet<String> = report.jobs.iter().map(|j| j.id.clone()).collect();
    state
        .jobs
        .retain(|id, job| job.rm.as_deref() != Some(rm) || reported.contains(id));
    for mut job in report.jobs {
        job.rm = Some(rm.to_string());
        state.jobs.insert(job.id.clone(), job);
    }
    debug!(rm = %rm, jobs = tally.job_count, new = tally.new_count, "workload applied");
    Ok(tally)
}

/// Rebuild node job lists and dedicated resources from the job table.
pub fn rebuild_assignments(state: &mut ClusterState) {
    for node in state.nodes.values_mut() {
        node.jobs.clear();
        node.dedicated.clear();
    }
    for job in state.jobs.values() {
        for alloc in &job.task_map {
            let Some(node) = state.nodes.get_mut(&alloc.node) else {
                continue;
            };
            if !node.jobs.contains(&job.id) {
                node.jobs.push(job.id.clone());
            }
            if job.is_active() {
                if let Some(req) = job.reqs.get(alloc.req) {
                    node.dedicated.add_scaled(&req.per_task, alloc.tasks);
                }
            }
        }
    }
}
