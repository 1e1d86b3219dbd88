//! Per-iteration summary.

use rmsync_core::Capability;
use serde::Serialize;

/// Notable side effects raised during an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollEvent {
    /// A driver call hit its deadline.
    TriggerFailure { rm: String, function: Capability },
    /// A license RM went down and its resources were zeroed.
    LicenseFlushed { rm: String, resources: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub node_count: u64,
    pub job_count: u64,
    pub new_job_count: u64,
    pub class_count: u64,
    /// Nodes visited after the cluster pass.
    pub visited_nodes: usize,
    /// Nodes initialized for the first time.
    pub new_nodes: Vec<String>,
    /// RMs with at least one failed call, in registration order.
    pub failed_rms: Vec<String>,
    pub deferred_pass: bool,
    pub events: Vec<PollEvent>,
}

impl IterationReport {
    pub(crate) fn note_failure(&mut self, rm: &str) {
        if !self.failed_rms.iter().any(|r| r == rm) {
            self.failed_rms.push(rm.to_string());
        }
    }
}
