//! Building a ready-to-run orchestrator from configuration.

use std::sync::Arc;

use anyhow::Context;
use rmsync_core::SchedulerConfig;
use rmsync_placement::{Admission, AdmissionEnforcer};
use rmsync_poll::PollOrchestrator;
use rmsync_state::{ClusterState, Job};
use tracing::{info, warn};

use crate::static_driver::{STATIC_SUBTYPE, StaticDriver};

/// Register every configured RM and attach the static driver where asked.
/// RMs of any other subtype are registered without a driver and skipped by
/// the passes until one is attached.
pub async fn build_orchestrator(config: &SchedulerConfig) -> anyhow::Result<PollOrchestrator> {
    let state = ClusterState::from_config(config).context("build cluster model")?;
    let mut orchestrator = PollOrchestrator::new(state, config.defaults());

    for rm in &config.resource_managers {
        if rm.subtype.as_deref() == Some(STATIC_SUBTYPE) {
            let driver = StaticDriver::from_config(config, &rm.name);
            orchestrator.attach(&rm.name, Arc::new(driver)).await?;
            info!(rm = %rm.name, "static driver attached");
        } else {
            warn!(rm = %rm.name, subtype = ?rm.subtype, "no driver for resource manager");
        }
    }
    Ok(orchestrator)
}

/// Check `job` against `node` in the orchestrator's current model.
/// `start_offset` is seconds after the model's clock.
pub async fn check_admission(
    orchestrator: &PollOrchestrator,
    job: &Job,
    node: &str,
    start_offset: u64,
    task_bound: Option<u32>,
) -> anyhow::Result<Admission> {
    let state = orchestrator.state();
    let state = state.read().await;
    let node = state.node(node)?;
    let enforcer = AdmissionEnforcer::new(&state, orchestrator.defaults());
    Ok(enforcer.check(job, node, state.now + start_offset, task_bound))
}
