//! Built-in driver for RMs whose nodes, jobs and licenses are declared in
//! the configuration file.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rmsync_core::{Capability, JobConfig, SchedulerConfig};
use rmsync_poll::{
    ClusterReport, DriverResult, GresReport, NodeReport, ResourceManagerDriver, WorkloadReport,
};
use rmsync_state::{Credentials, Job, JobState, Qos, Req, TaskAllocation};
use tokio::sync::Mutex;

/// Subtype that selects this driver in `[[resource_manager]]`.
pub const STATIC_SUBTYPE: &str = "static";

pub struct StaticDriver {
    nodes: Vec<NodeReport>,
    jobs: Vec<Job>,
    licenses: Vec<GresReport>,
    /// Job ids already handed out, for the new-job count.
    reported: Mutex<BTreeSet<String>>,
}

impl StaticDriver {
    /// Collect everything in `config` that belongs to `rm`.
    pub fn from_config(config: &SchedulerConfig, rm: &str) -> Self {
        let nodes = config
            .nodes
            .iter()
            .filter(|n| n.rm == rm)
            .map(|n| NodeReport {
                id: n.id.clone(),
                state: n.state,
                partition: n.partition.clone(),
                configured: Some(n.resources.clone()),
                available: Some(n.resources.clone()),
                access_policy: n.access_policy,
                limits: Some(n.limits),
                policy: n.policy,
                messages: n.messages.clone(),
            })
            .collect();
        let jobs = config
            .jobs
            .iter()
            .filter(|j| j.rm == rm)
            .map(job_from_config)
            .collect();
        let licenses = config
            .licenses
            .iter()
            .filter(|l| l.rm == rm)
            .map(|l| GresReport {
                name: l.name.clone(),
                configured: l.count,
                available: l.count,
            })
            .collect();
        Self {
            nodes,
            jobs,
            licenses,
            reported: Mutex::new(BTreeSet::new()),
        }
    }
}

/// Build a single-req job. Running jobs are placed per their `tasks` map;
/// idle jobs carry the total as their task count only.
pub fn job_from_config(cfg: &JobConfig) -> Job {
    let total: u32 = cfg.tasks.values().sum();
    let task_map = if cfg.running {
        cfg.tasks
            .iter()
            .filter(|(_, tasks)| **tasks > 0)
            .map(|(node, tasks)| TaskAllocation {
                node: node.clone(),
                req: 0,
                tasks: *tasks,
            })
            .collect()
    } else {
        Vec::new()
    };
    Job {
        id: cfg.id.clone(),
        actual_job: None,
        credentials: Credentials {
            user: cfg.user.clone(),
            group: cfg.group.clone(),
            account: cfg.account.clone(),
            qos: cfg.qos.as_ref().map(|name| Qos {
                name: name.clone(),
                dedicated: cfg.qos_dedicated,
            }),
        },
        state: if cfg.running {
            JobState::Running
        } else {
            JobState::Idle
        },
        reqs: vec![Req {
            per_task: cfg.per_task.clone(),
            task_count: total.max(1),
            access_policy: cfg.access_policy,
        }],
        task_map,
        system: None,
        rm: None,
    }
}

#[async_trait]
impl ResourceManagerDriver for StaticDriver {
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::ClusterQuery, Capability::WorkloadQuery]
    }

    async fn cluster_query(&self) -> DriverResult<ClusterReport> {
        Ok(ClusterReport {
            node_count: self.nodes.len() as i64,
            nodes: self.nodes.clone(),
            gres: self.licenses.clone(),
        })
    }

    async fn workload_query(&self) -> DriverResult<WorkloadReport> {
        let mut reported = self.reported.lock().await;
        let new_count = self
            .jobs
            .iter()
            .filter(|j| reported.insert(j.id.clone()))
            .count();
        Ok(WorkloadReport {
            job_count: self.jobs.len() as i64,
            new_count: new_count as i64,
            jobs: self.jobs.clone(),
        })
    }
}
