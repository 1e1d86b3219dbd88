//! AdmissionEnforcer: may this job use this node at this start time, and
//! for how many tasks?
//!
//! The enforcer only reads the cluster model. It is safe to call once per
//! candidate node and start time in a placement search.

use rmsync_core::limits::node_or_default;
use rmsync_core::{NodeAccessPolicy, NodeState, Resources, SchedulerDefaults};
use rmsync_state::{ClusterState, Job, Node, Req};
use serde::Serialize;
use tracing::debug;

use crate::access::{LOOKAHEAD_SECS, check_access, effective_policy};
use crate::pe::{job_pe, pe_per_task};
use crate::reason::RejectReason;

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    pub admitted: bool,
    /// Max tasks allowed on the node. `None` when no bound was supplied.
    pub task_bound: Option<u32>,
    pub reason: Option<RejectReason>,
}

impl Admission {
    fn admit(task_bound: Option<u32>) -> Self {
        Self {
            admitted: true,
            task_bound,
            reason: None,
        }
    }

    fn reject(reason: RejectReason, task_bound: Option<u32>) -> Self {
        Self {
            admitted: false,
            task_bound,
            reason: Some(reason),
        }
    }
}

/// Limits in force for one check after node → default fallback.
#[derive(Debug, Clone, Copy, Default)]
struct EffectiveLimits {
    max_jobs: u32,
    max_procs: u32,
    max_pe: u32,
    max_pe_per_job: f64,
    max_job_per_user: u32,
    max_proc_per_user: u32,
    max_job_per_group: u32,
    max_proc_per_group: u32,
}

impl EffectiveLimits {
    fn any(&self) -> bool {
        self.max_jobs > 0
            || self.max_procs > 0
            || self.max_pe > 0
            || self.max_pe_per_job > 0.0
            || self.max_job_per_user > 0
            || self.max_proc_per_user > 0
            || self.max_job_per_group > 0
            || self.max_proc_per_group > 0
    }
}

/// Running totals on a node, including the candidate's first task.
#[derive(Debug, Default)]
struct Usage {
    jobs: u32,
    procs: u32,
    pe: u32,
    user_jobs: u32,
    user_procs: u32,
    group_jobs: u32,
    group_procs: u32,
}

pub struct AdmissionEnforcer<'a> {
    state: &'a ClusterState,
    defaults: &'a SchedulerDefaults,
    now: u64,
}

impl<'a> AdmissionEnforcer<'a> {
    pub fn new(state: &'a ClusterState, defaults: &'a SchedulerDefaults) -> Self {
        Self {
            state,
            defaults,
            now: state.now,
        }
    }

    /// Override the clock (defaults to the cluster model's `now`).
    pub fn with_now(mut self, now: u64) -> Self {
        self.now = now;
        self
    }

    /// Check `job` on `node` at `start_time`. `task_bound` is the caller's
    /// upper bound on tasks; the returned bound never exceeds it.
    pub fn check(
        &self,
        job: &Job,
        node: &Node,
        start_time: u64,
        task_bound: Option<u32>,
    ) -> Admission {
        let mut bound = task_bound;
        let outcome = self.evaluate(job, node, start_time, &mut bound);
        match outcome {
            Ok(()) => Admission::admit(bound),
            Err(reason) => {
                debug!(
                    job = %job.id,
                    node = %node.id,
                    start_time,
                    reason = %reason,
                    "admission rejected"
                );
                Admission::reject(reason, bound)
            }
        }
    }

    fn evaluate(
        &self,
        job: &Job,
        node: &Node,
        start_time: u64,
        bound: &mut Option<u32>,
    ) -> Result<(), RejectReason> {
        let Some(primary) = job.primary_req() else {
            if bound.is_some() {
                *bound = Some(0);
            }
            return Err(RejectReason::InvalidRequest);
        };
        let dedicated = job.is_dedicated();
        let limits = self.limits_for(node, dedicated);

        // ── Resource limits ──

        if limits.any() && start_time <= self.now + LOOKAHEAD_SECS {
            self.check_limits(job, node, primary, &limits, bound)?;
        }

        // ── Node state ──

        if start_time <= self.now && !matches!(node.state, NodeState::Idle | NodeState::Active) {
            return Err(RejectReason::NodeState(node.state));
        }

        // ── Access policy ──

        let policy = if job.system.is_some() {
            None
        } else {
            let partition_policy = self
                .state
                .partition(node.partition.as_deref())
                .and_then(|p| p.access_policy);
            effective_policy(
                node,
                node.stored_access_policy(),
                partition_policy,
                job.requested_access_policy(),
                self.defaults,
            )
        };
        check_access(self.state, node, job, start_time, policy)?;

        // ── Task clamping ──

        let Some(mut tc) = *bound else {
            return Ok(());
        };
        match policy {
            Some(NodeAccessPolicy::SingleTask) => tc = tc.min(1),
            Some(NodeAccessPolicy::SingleJob) if !dedicated => {
                if let Some(cap) = pe_job_cap(limits.max_pe_per_job, node.configured.procs) {
                    let pe = pe_per_task(&node.configured, &primary.per_task);
                    tc = tc.min(cap.min(tc.saturating_mul(pe)));
                }
            }
            _ => {}
        }
        *bound = Some(tc);
        if tc == 0 {
            return Err(RejectReason::InadequateTasks);
        }
        Ok(())
    }

    fn limits_for(&self, node: &Node, dedicated: bool) -> EffectiveLimits {
        let d = self.defaults;
        let node_cred = node.policy.unwrap_or_default();
        let default_cred = d.credential_limits.unwrap_or_default();
        let max_pe_per_job = if node_cred.max_pe_per_job > 0.0 {
            node_cred.max_pe_per_job
        } else {
            default_cred.max_pe_per_job
        };
        let (max_procs, max_pe) = if dedicated {
            (0, 0)
        } else {
            (
                node_or_default(node.limits.max_procs, d.node_limits.max_procs),
                node_or_default(node.limits.max_pe, d.node_limits.max_pe),
            )
        };
        EffectiveLimits {
            max_jobs: node_or_default(node.limits.max_jobs, d.node_limits.max_jobs),
            max_procs,
            max_pe,
            max_pe_per_job,
            max_job_per_user: node_or_default(
                node_cred.max_job_per_user,
                default_cred.max_job_per_user,
            ),
            max_proc_per_user: node_or_default(
                node_cred.max_proc_per_user,
                default_cred.max_proc_per_user,
            ),
            max_job_per_group: node_or_default(
                node_cred.max_job_per_group,
                default_cred.max_job_per_group,
            ),
            max_proc_per_group: node_or_default(
                node_cred.max_proc_per_group,
                default_cred.max_proc_per_group,
            ),
        }
    }

    fn tally(&self, job: &Job, node: &Node, primary: &Req, with_pe: bool) -> Usage {
        let cfg = &node.configured;
        let task_procs = primary.per_task.procs;
        let creds = &job.credentials;
        let mut usage = Usage {
            jobs: 1,
            procs: task_procs,
            user_jobs: 1,
            user_procs: task_procs,
            group_jobs: 1,
            group_procs: task_procs,
            ..Usage::default()
        };
        if with_pe {
            usage.pe = job
                .reqs
                .iter()
                .map(|rq| pe_per_task(cfg, &rq.per_task))
                .fold(0, u32::saturating_add);
        }

        for other in self.state.jobs_on(node) {
            if other.id == job.id || !other.is_active() || other.task_map.is_empty() {
                continue;
            }
            let same_user = other.credentials.user == creds.user;
            let same_group =
                creds.group.is_some() && other.credentials.group == creds.group;
            usage.jobs = usage.jobs.saturating_add(1);
            if same_user {
                usage.user_jobs = usage.user_jobs.saturating_add(1);
            }
            if same_group {
                usage.group_jobs = usage.group_jobs.saturating_add(1);
            }
            for (req_index, tasks) in other.allocations_on(&node.id) {
                let Some(rq) = other.reqs.get(req_index).or(other.primary_req()) else {
                    continue;
                };
                let procs = rq.per_task.procs.saturating_mul(tasks);
                usage.procs = usage.procs.saturating_add(procs);
                if with_pe {
                    let pe = pe_per_task(cfg, &rq.per_task).saturating_mul(tasks);
                    usage.pe = usage.pe.saturating_add(pe);
                }
                if same_user {
                    usage.user_procs = usage.user_procs.saturating_add(procs);
                }
                if same_group {
                    usage.group_procs = usage.group_procs.saturating_add(procs);
                }
            }
        }
        usage
    }

    fn check_limits(
        &self,
        job: &Job,
        node: &Node,
        primary: &Req,
        limits: &EffectiveLimits,
        bound: &mut Option<u32>,
    ) -> Result<(), RejectReason> {
        let usage = self.tally(job, node, primary, limits.max_pe > 0);
        let task_procs = primary.per_task.procs;

        if limits.max_jobs > 0 && usage.jobs > limits.max_jobs {
            return Err(RejectReason::MaxJobPerNode);
        }
        if limits.max_pe > 0 && usage.pe > limits.max_pe {
            return Err(RejectReason::MaxPePerNode);
        }
        if let Some(cap) = pe_job_cap(limits.max_pe_per_job, node.configured.procs) {
            let total: Resources = self.state.total_configured();
            if job_pe(job, &total) as u32 > cap {
                return Err(RejectReason::MaxPePerJob);
            }
        }
        if limits.max_job_per_group > 0 && usage.group_jobs > limits.max_job_per_group {
            return Err(RejectReason::MaxJobPerGroup);
        }
        if limits.max_job_per_user > 0 && usage.user_jobs > limits.max_job_per_user {
            return Err(RejectReason::MaxJobPerUser);
        }

        let proc_caps = [
            (limits.max_proc_per_user, usage.user_procs, RejectReason::MaxProcPerUser),
            (limits.max_proc_per_group, usage.group_procs, RejectReason::MaxProcPerGroup),
            (limits.max_procs, usage.procs, RejectReason::MaxProcPerNode),
        ];
        for (cap, used, reason) in proc_caps {
            if cap == 0 {
                continue;
            }
            clamp_to_proc_cap(bound, cap, used, task_procs);
            if used > cap {
                return Err(reason);
            }
        }
        Ok(())
    }
}

/// Tighten `bound` to the tasks that fit under `cap` given `used` procs,
/// where `used` already includes one task of the candidate.
fn clamp_to_proc_cap(bound: &mut Option<u32>, cap: u32, used: u32, task_procs: u32) {
    let Some(current) = *bound else { return };
    if task_procs == 0 {
        return;
    }
    let headroom = i64::from(cap) - i64::from(used);
    let fits = (1 + headroom / i64::from(task_procs)).max(0);
    let fits = u32::try_from(fits).unwrap_or(u32::MAX);
    *bound = Some(current.min(fits));
}

/// MaxPEPerJob as an absolute PE cap. Values above 1.0 are absolute; values
/// in (0, 1] are a fraction of the node's procs.
fn pe_job_cap(max_pe_per_job: f64, node_procs: u32) -> Option<u32> {
    if max_pe_per_job <= 0.0 {
        None
    } else if max_pe_per_job > 1.0 {
        Some(max_pe_per_job as u32)
    } else {
        Some((max_pe_per_job * f64::from(node_procs)) as u32)
    }
}
