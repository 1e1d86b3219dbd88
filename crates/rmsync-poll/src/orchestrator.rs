//! The poll orchestrator: one synchronization iteration across every RM.
//!
//! An iteration runs the cluster pass, visits reported nodes, then runs the
//! queue and workload passes. Driver calls happen without holding the state
//! lock; each result is applied under a short write lock once the call has
//! returned or been abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmsync_core::{Capability, RmKind, RmState, SchedulerDefaults, StatusCode};
use rmsync_state::{ClusterState, ResourceManager};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::apply::{self, Reporters};
use crate::driver::{DriverError, ResourceManagerDriver};
use crate::error::{PollError, PollResult};
use crate::report::{IterationReport, PollEvent};
use crate::timed::{CallOutcome, call_with_timeout};
use crate::visit;

/// Drives synchronization iterations against the registered RMs.
pub struct PollOrchestrator {
    state: Arc<RwLock<ClusterState>>,
    drivers: HashMap<String, Arc<dyn ResourceManagerDriver>>,
    defaults: SchedulerDefaults,
    /// Held for the whole of an iteration so two never overlap.
    iteration_lock: Mutex<()>,
}

impl PollOrchestrator {
    pub fn new(state: ClusterState, defaults: SchedulerDefaults) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            drivers: HashMap::new(),
            defaults,
            iteration_lock: Mutex::new(()),
        }
    }

    /// Bind a driver to a registered RM.
    pub async fn attach(
        &mut self,
        rm: &str,
        driver: Arc<dyn ResourceManagerDriver>,
    ) -> PollResult<()> {
        if self.state.read().await.rm(rm).is_none() {
            return Err(PollError::UnknownResourceManager(rm.to_string()));
        }
        debug!(rm = %rm, capabilities = ?driver.capabilities(), "driver attached");
        self.drivers.insert(rm.to_string(), driver);
        Ok(())
    }

    /// Shared handle to the cluster model.
    pub fn state(&self) -> Arc<RwLock<ClusterState>> {
        Arc::clone(&self.state)
    }

    pub fn defaults(&self) -> &SchedulerDefaults {
        &self.defaults
    }

    /// Run one iteration stamped with the wall clock.
    pub async fn run_iteration(&self) -> IterationReport {
        self.run_iteration_at(epoch_secs()).await
    }

    /// Run one iteration stamped with `now` (seconds since the epoch).
    pub async fn run_iteration_at(&self, now: u64) -> IterationReport {
        let _running = self.iteration_lock.lock().await;
        let mut report = IterationReport::default();
        {
            let mut state = self.state.write().await;
            state.advance(now);
            report.iteration = state.iteration;
        }

        let reporters = self.cluster_pass(&mut report).await;
        {
            let mut state = self.state.write().await;
            visit::visit_nodes(&mut state, &reporters, &self.defaults, &mut report);
        }

        self.queue_pass(&mut report).await;
        self.workload_pass(&mut report).await;

        {
            let mut state = self.state.write().await;
            apply::rebuild_assignments(&mut state);
            visit::refresh_access_policies(&mut state, &self.defaults);
        }

        info!(
            iteration = report.iteration,
            nodes = report.node_count,
            jobs = report.job_count,
            new_jobs = report.new_job_count,
            classes = report.class_count,
            failed = report.failed_rms.len(),
            "iteration complete"
        );
        report
    }

    /// Poll until `shutdown` flips or `max_iterations` have run.
    /// Returns the number of iterations completed.
    pub async fn run<F>(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        max_iterations: Option<u64>,
        mut on_report: F,
    ) -> u64
    where
        F: FnMut(&IterationReport),
    {
        let mut completed = 0u64;
        info!(interval_secs = interval.as_secs(), "poll loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let report = self.run_iteration().await;
            on_report(&report);
            completed += 1;
            if max_iterations.is_some_and(|max| completed >= max) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    debug!("poll loop shutting down");
                    break;
                }
            }
        }
        info!(iterations = completed, "poll loop stopped");
        completed
    }

    // ── Passes ───────────────────────────────────────────────────

    async fn snapshot(&self) -> Vec<ResourceManager> {
        self.state.read().await.rms().to_vec()
    }

    fn driver_for(
        &self,
        rm: &ResourceManager,
        capability: Capability,
    ) -> Option<Arc<dyn ResourceManagerDriver>> {
        if !rm.allows(capability) {
            return None;
        }
        let driver = self.drivers.get(&rm.name)?;
        driver
            .capabilities()
            .contains(&capability)
            .then(|| Arc::clone(driver))
    }

    async fn cluster_pass(&self, report: &mut IterationReport) -> Reporters {
        let mut reporters = Reporters::new();

        for rm in self.snapshot().await {
            if !rm.is_real()
                || rm.flags.client
                || rm.state == RmState::Disabled
                || rm.kind == RmKind::Info
            {
                continue;
            }
            let Some(driver) = self.driver_for(&rm, Capability::ClusterQuery) else {
                continue;
            };

            if rm.state == RmState::Corrupt && rm.kind != RmKind::Peer {
                info!(rm = %rm.name, "resetting corrupt resource manager");
                if let Ok(entry) = self.state.write().await.rm_mut(&rm.name) {
                    entry.state = RmState::Active;
                }
            }

            let outcome =
                call_with_timeout(rm.timeout, async move { driver.cluster_query().await }).await;

            let mut state = self.state.write().await;
            let failed = match outcome {
                CallOutcome::Completed(cluster) => {
                    let nodes = cluster.nodes.len();
                    match apply::apply_cluster_report(&mut state, &rm.name, cluster, &mut reporters) {
                        Ok(count) => {
                            report.node_count += u64::from(count);
                            debug!(rm = %rm.name, nodes, "cluster query applied");
                        }
                        Err(e) => error!(rm = %rm.name, error = %e, "cluster report not applied"),
                    }
                    false
                }
                CallOutcome::Failed(err) => {
                    let message = err
                        .message
                        .clone()
                        .unwrap_or_else(|| "cannot get node info".to_string());
                    fail(&mut state, &rm, Capability::ClusterQuery, &err, message, report);
                    true
                }
                CallOutcome::TimedOut => {
                    timed_out(&mut state, &rm, Capability::ClusterQuery, report);
                    true
                }
            };

            if failed {
                let resources = apply::flush_license_resources(&mut state, &rm.name);
                if !resources.is_empty() {
                    report.events.push(PollEvent::LicenseFlushed {
                        rm: rm.name.clone(),
                        resources,
                    });
                }
            }
        }

        reporters
    }

    async fn queue_pass(&self, report: &mut IterationReport) {
        for rm in self.snapshot().await {
            if !workload_eligible(&rm) {
                continue;
            }
            let Some(driver) = self.driver_for(&rm, Capability::QueueQuery) else {
                continue;
            };
            let outcome =
                call_with_timeout(rm.timeout, async move { driver.queue_query().await }).await;

            let mut state = self.state.write().await;
            match outcome {
                CallOutcome::Completed(queues) => {
                    match apply::apply_queue_report(&mut state, &rm.name, queues) {
                        Ok(count) => report.class_count += u64::from(count),
                        Err(e) => error!(rm = %rm.name, error = %e, "queue report not applied"),
                    }
                }
                CallOutcome::Failed(err) => {
                    let message = match err.message.as_deref() {
                        Some(msg) => format!("cannot get queue info - {msg}"),
                        None => "cannot get queue info".to_string(),
                    };
                    fail(&mut state, &rm, Capability::QueueQuery, &err, message, report);
                }
                CallOutcome::TimedOut => {
                    timed_out(&mut state, &rm, Capability::QueueQuery, report);
                }
            }
        }
    }

    async fn workload_pass(&self, report: &mut IterationReport) {
        let mut deferred = Vec::new();
        // Any first-pass RM with new jobs, including ones left out of totals.
        let mut new_jobs_seen = false;
        for rm in self.snapshot().await {
            if !workload_eligible(&rm) {
                continue;
            }
            if rm.flags.static_source && rm.flags.no_create_all {
                deferred.push(rm);
                continue;
            }
            new_jobs_seen |= self.query_workload(&rm, report).await;
        }

        if new_jobs_seen && !deferred.is_empty() {
            debug!(rms = deferred.len(), "running deferred static workload pass");
            report.deferred_pass = true;
            for rm in &deferred {
                self.query_workload(rm, report).await;
            }
        }
    }

    /// Returns true when the RM reported at least one new job.
    async fn query_workload(&self, rm: &ResourceManager, report: &mut IterationReport) -> bool {
        let Some(driver) = self.driver_for(rm, Capability::WorkloadQuery) else {
            return false;
        };
        let outcome =
            call_with_timeout(rm.timeout, async move { driver.workload_query().await }).await;

        let mut state = self.state.write().await;
        match outcome {
            CallOutcome::Completed(workload) => {
                match apply::apply_workload_report(&mut state, &rm.name, workload) {
                    Ok(tally) => {
                        if !rm.flags.no_create_all {
                            report.job_count += u64::from(tally.job_count);
                            report.new_job_count += u64::from(tally.new_count);
                        }
                        tally.new_count > 0
                    }
                    Err(e) => {
                        error!(rm = %rm.name, error = %e, "workload report not applied");
                        false
                    }
                }
            }
            CallOutcome::Failed(err) => {
                let message = err
                    .message
                    .clone()
                    .unwrap_or_else(|| "cannot get workload info".to_string());
                fail(&mut state, rm, Capability::WorkloadQuery, &err, message, report);
                false
            }
            CallOutcome::TimedOut => {
                timed_out(&mut state, rm, Capability::WorkloadQuery, report);
                false
            }
        }
    }
}

/// Queue and workload passes skip RMs that cannot answer for jobs.
fn workload_eligible(rm: &ResourceManager) -> bool {
    rm.is_real()
        && !rm.flags.client
        && !matches!(rm.state, RmState::Disabled | RmState::Down)
}

fn fail(
    state: &mut ClusterState,
    rm: &ResourceManager,
    function: Capability,
    err: &DriverError,
    message: String,
    report: &mut IterationReport,
) {
    let cause = if err.code == StatusCode::NoError {
        StatusCode::SysFailure
    } else {
        err.code
    };
    warn!(rm = %rm.name, ?function, ?cause, %message, "resource manager query failed");
    if let Err(e) = apply::record_failure(state, &rm.name, function, cause, message) {
        error!(rm = %rm.name, error = %e, "failure not recorded");
    }
    report.note_failure(&rm.name);
}

fn timed_out(
    state: &mut ClusterState,
    rm: &ResourceManager,
    function: Capability,
    report: &mut IterationReport,
) {
    warn!(rm = %rm.name, ?function, timeout_ms = rm.timeout.as_millis() as u64, "resource manager query timed out");
    report.events.push(PollEvent::TriggerFailure {
        rm: rm.name.clone(),
        function,
    });
    if let Err(e) = apply::record_failure(
        state,
        &rm.name,
        function,
        StatusCode::Timeout,
        "timeout".to_string(),
    ) {
        error!(rm = %rm.name, error = %e, "failure not recorded");
    }
    report.note_failure(&rm.name);
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ClusterReport, DriverResult, NodeReport, QueueReport, WorkloadReport};
    use async_trait::async_trait;
    use rmsync_core::NodeState;

    struct Fixed {
        nodes: Vec<NodeReport>,
        delay: Option<Duration>,
        error: Option<DriverError>,
    }

    impl Fixed {
        fn nodes(nodes: Vec<NodeReport>) -> Self {
            Self { nodes, delay: None, error: None }
        }
    }

    #[async_trait]
    impl ResourceManagerDriver for Fixed {
        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::ClusterQuery, Capability::QueueQuery, Capability::WorkloadQuery]
        }

        async fn cluster_query(&self) -> DriverResult<ClusterReport> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            Ok(ClusterReport {
                node_count: self.nodes.len() as i64,
                nodes: self.nodes.clone(),
                gres: vec![],
            })
        }

        async fn queue_query(&self) -> DriverResult<QueueReport> {
            Ok(QueueReport { classes: vec!["batch".into()] })
        }

        async fn workload_query(&self) -> DriverResult<WorkloadReport> {
            Ok(WorkloadReport::default())
        }
    }

    fn cluster(rms: &[&str]) -> ClusterState {
        let mut state = ClusterState::new();
        for rm in rms {
            let mut entry = ResourceManager::new(*rm, RmKind::Compute);
            entry.timeout = Duration::from_millis(100);
            state.register_rm(entry).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn attach_rejects_unknown_rm() {
        let mut orch = PollOrchestrator::new(cluster(&["pbs"]), SchedulerDefaults::default());
        let err = orch
            .attach("nope", Arc::new(Fixed::nodes(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::UnknownResourceManager(name) if name == "nope"));
    }

    #[tokio::test]
    async fn iteration_counts_nodes_and_classes() {
        let mut orch = PollOrchestrator::new(cluster(&["pbs"]), SchedulerDefaults::default());
        orch.attach(
            "pbs",
            Arc::new(Fixed::nodes(vec![
                NodeReport::new("n1", NodeState::Idle),
                NodeReport::new("n2", NodeState::Busy),
            ])),
        )
        .await
        .unwrap();

        let report = orch.run_iteration_at(1_000).await;
        assert_eq!(report.iteration, 1);
        assert_eq!(report.node_count, 2);
        assert_eq!(report.class_count, 1);
        assert_eq!(report.new_nodes, vec!["n1", "n2"]);
        assert!(report.failed_rms.is_empty());

        let state = orch.state();
        let state = state.read().await;
        assert_eq!(state.node("n2").unwrap().state, NodeState::Busy);
        assert_eq!(state.rm("pbs").unwrap().state, RmState::Active);
    }

    #[tokio::test]
    async fn structural_failure_marks_rm_corrupt_then_resets() {
        let mut orch = PollOrchestrator::new(cluster(&["pbs"]), SchedulerDefaults::default());
        orch.attach(
            "pbs",
            Arc::new(Fixed {
                nodes: vec![],
                delay: None,
                error: Some(DriverError::silent(StatusCode::BadResponse)),
            }),
        )
        .await
        .unwrap();

        let report = orch.run_iteration_at(1).await;
        assert_eq!(report.failed_rms, vec!["pbs"]);
        {
            let state = orch.state();
            let state = state.read().await;
            let rm = state.rm("pbs").unwrap();
            assert_eq!(rm.state, RmState::Corrupt);
            assert_eq!(rm.failures.last_message.as_deref(), Some("cannot get node info"));
        }

        // Reset to active before the call, then marked corrupt again.
        orch.run_iteration_at(2).await;
        let state = orch.state();
        let state = state.read().await;
        assert_eq!(state.rm("pbs").unwrap().state, RmState::Corrupt);
        assert_eq!(state.rm("pbs").unwrap().failures.fail_count, 2);
    }

    #[tokio::test]
    async fn hung_driver_times_out_without_blocking_others() {
        let mut orch = PollOrchestrator::new(cluster(&["slow", "fast"]), SchedulerDefaults::default());
        orch.attach(
            "slow",
            Arc::new(Fixed {
                nodes: vec![NodeReport::new("s1", NodeState::Idle)],
                delay: Some(Duration::from_secs(30)),
                error: None,
            }),
        )
        .await
        .unwrap();
        orch.attach("fast", Arc::new(Fixed::nodes(vec![NodeReport::new("f1", NodeState::Idle)])))
            .await
            .unwrap();

        let report = orch.run_iteration_at(10).await;
        assert_eq!(report.failed_rms, vec!["slow"]);
        assert!(report.events.contains(&PollEvent::TriggerFailure {
            rm: "slow".into(),
            function: Capability::ClusterQuery,
        }));

        let state = orch.state();
        let state = state.read().await;
        assert!(state.node("s1").is_err());
        assert_eq!(state.node("f1").unwrap().state, NodeState::Idle);
        let slow = state.rm("slow").unwrap();
        assert_eq!(slow.state, RmState::Down);
        let last = slow.failures.last().unwrap();
        assert_eq!(last.code, StatusCode::SysFailure);
        assert_eq!(last.cause, StatusCode::Timeout);
        assert_eq!(last.message, "timeout");
    }

    #[tokio::test]
    async fn run_stops_after_max_iterations() {
        let mut orch = PollOrchestrator::new(cluster(&["pbs"]), SchedulerDefaults::default());
        orch.attach("pbs", Arc::new(Fixed::nodes(vec![]))).await.unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut seen = Vec::new();
        let n = orch
            .run(Duration::from_millis(5), rx, Some(3), |r| seen.push(r.iteration))
            .await;
        assert_eq!(n, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let orch = PollOrchestrator::new(cluster(&[]), SchedulerDefaults::default());
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        let n = orch.run(Duration::from_secs(60), rx, None, |_| {}).await;
        assert_eq!(n, 1);
        stopper.await.unwrap();
    }
}
