//! Processor-equivalent math.
//!
//! A PE folds memory, disk, and swap demand into a proc count: a task that
//! needs half a node's memory costs half the node's procs, even if it only
//! asks for one proc.

use rmsync_core::Resources;
use rmsync_state::Job;

/// Largest per-dimension share of `cfg` that `req` consumes.
pub fn pe_ratio(cfg: &Resources, req: &Resources) -> f64 {
    if cfg.procs == 0 {
        return 0.0;
    }
    let mut ratio = f64::from(req.procs) / f64::from(cfg.procs);
    for (want, have) in [
        (req.memory, cfg.memory),
        (req.disk, cfg.disk),
        (req.swap, cfg.swap),
    ] {
        if want > 0 && have > 0 {
            ratio = ratio.max(want as f64 / have as f64);
        }
    }
    ratio
}

/// PE of one task of `req` on a node configured as `cfg`, truncated.
pub fn pe_per_task(cfg: &Resources, req: &Resources) -> u32 {
    (pe_ratio(cfg, req) * f64::from(cfg.procs)) as u32
}

/// PE of the whole job measured against `total` (cluster-wide configured
/// resources).
pub fn job_pe(job: &Job, total: &Resources) -> f64 {
    let sum: f64 = job
        .reqs
        .iter()
        .map(|rq| f64::from(rq.task_count) * pe_ratio(total, &rq.per_task))
        .sum();
    sum * f64::from(total.procs)
}
