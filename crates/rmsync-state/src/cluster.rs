//! ClusterState, the authoritative in-memory model refreshed every iteration.

use std::collections::BTreeMap;

use rmsync_core::{Resources, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::registry::ResourceManager;
use crate::types::*;

/// Cluster-wide generic resources (licenses and the like).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalResources {
    pub configured: BTreeMap<String, u64>,
    pub available: BTreeMap<String, u64>,
    /// Which RM advertises each resource.
    pub owner: BTreeMap<String, RmName>,
}

impl GlobalResources {
    /// Zero every resource owned by `rm`. Returns the names touched.
    pub fn flush_owned_by(&mut self, rm: &str) -> Vec<String> {
        let owned: Vec<String> = self
            .owner
            .iter()
            .filter(|(_, owner)| owner.as_str() == rm)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            self.configured.insert(name.clone(), 0);
            self.available.insert(name.clone(), 0);
        }
        owned
    }
}

/// A queue/class advertised by an RM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueClass {
    pub name: String,
    pub rm: RmName,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub iteration: u64,
    /// Scheduler clock, epoch seconds.
    pub now: u64,
    rms: Vec<ResourceManager>,
    pub nodes: BTreeMap<NodeId, Node>,
    pub jobs: BTreeMap<JobId, Job>,
    pub partitions: BTreeMap<String, Partition>,
    pub gres: GlobalResources,
    pub classes: BTreeMap<String, QueueClass>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register RMs (in file order) and partitions from configuration.
    pub fn from_config(config: &SchedulerConfig) -> StateResult<Self> {
        let mut state = Self::new();
        let history = config.scheduler.max_failure_history;
        for rm in &config.resource_managers {
            state.register_rm(ResourceManager::from_config(rm, history))?;
        }
        for p in &config.partitions {
            state.partitions.insert(
                p.name.clone(),
                Partition {
                    name: p.name.clone(),
                    access_policy: p.access_policy,
                },
            );
        }
        Ok(state)
    }

    // ── Registry ───────────────────────────────────────────────────

    pub fn register_rm(&mut self, rm: ResourceManager) -> StateResult<()> {
        if self.rm(&rm.name).is_some() {
            return Err(StateError::DuplicateResourceManager(rm.name));
        }
        debug!(rm = %rm.name, kind = %rm.kind, "resource manager registered");
        self.rms.push(rm);
        Ok(())
    }

    /// All RMs in registration order.
    pub fn rms(&self) -> &[ResourceManager] {
        &self.rms
    }

    pub fn rm(&self, name: &str) -> Option<&ResourceManager> {
        self.rms.iter().find(|rm| rm.name == name)
    }

    pub fn rm_mut(&mut self, name: &str) -> StateResult<&mut ResourceManager> {
        self.rms
            .iter_mut()
            .find(|rm| rm.name == name)
            .ok_or_else(|| StateError::UnknownResourceManager(name.to_string()))
    }

    pub fn rm_names(&self) -> Vec<RmName> {
        self.rms.iter().map(|rm| rm.name.clone()).collect()
    }

    // ── Nodes and jobs ─────────────────────────────────────────────

    /// Fetch a node, creating it (flagged new) on first sight.
    pub fn upsert_node(&mut self, id: &str) -> &mut Node {
        self.nodes.entry(id.to_string()).or_insert_with(|| {
            debug!(node = %id, "node discovered");
            Node::new(id)
        })
    }

    pub fn node(&self, id: &str) -> StateResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| StateError::UnknownNode(id.to_string()))
    }

    pub fn node_mut(&mut self, id: &str) -> StateResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownNode(id.to_string()))
    }

    /// Jobs listed on `node`, skipping ids no longer in the job table.
    pub fn jobs_on<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Job> + 'a {
        node.jobs.iter().filter_map(|id| self.jobs.get(id))
    }

    pub fn partition(&self, name: Option<&str>) -> Option<&Partition> {
        name.and_then(|n| self.partitions.get(n))
    }

    /// Sum of configured resources across every node.
    pub fn total_configured(&self) -> Resources {
        let mut total = Resources::default();
        for node in self.nodes.values() {
            total.add_scaled(&node.configured, 1);
        }
        total
    }

    /// Start a new iteration at `now`.
    pub fn advance(&mut self, now: u64) {
        self.iteration += 1;
        self.now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmsync_core::RmKind;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut state = ClusterState::new();
        state
            .register_rm(ResourceManager::new("pbs", RmKind::Compute))
            .unwrap();
        let err = state
            .register_rm(ResourceManager::new("pbs", RmKind::Storage))
            .unwrap_err();
        assert!(matches!(err, StateError::DuplicateResourceManager(n) if n == "pbs"));
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut state = ClusterState::new();
        for name in ["xcat", "pbs", "flexlm"] {
            state
                .register_rm(ResourceManager::new(name, RmKind::Compute))
                .unwrap();
        }
        assert_eq!(state.rm_names(), vec!["xcat", "pbs", "flexlm"]);
        assert!(state.rm_mut("ghost").is_err());
    }

    #[test]
    fn upsert_creates_once() {
        let mut state = ClusterState::new();
        state.upsert_node("n1").is_new = false;
        assert!(!state.upsert_node("n1").is_new);
        assert_eq!(state.nodes.len(), 1);
    }

    #[test]
    fn jobs_on_skips_dangling_ids() {
        let mut state = ClusterState::new();
        state.jobs.insert(
            "j1".into(),
            Job {
                id: "j1".into(),
                ..Job::default()
            },
        );
        let node = state.upsert_node("n1");
        node.jobs = vec!["j1".into(), "gone".into()];
        let node = state.node("n1").unwrap().clone();
        let ids: Vec<_> = state.jobs_on(&node).map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["j1"]);
    }

    #[test]
    fn flush_only_touches_owned_resources() {
        let mut gres = GlobalResources::default();
        for (name, owner) in [("matlab", "flexlm"), ("gpu", "pbs")] {
            gres.configured.insert(name.into(), 10);
            gres.available.insert(name.into(), 7);
            gres.owner.insert(name.into(), owner.into());
        }
        let flushed = gres.flush_owned_by("flexlm");
        assert_eq!(flushed, vec!["matlab"]);
        assert_eq!(gres.available["matlab"], 0);
        assert_eq!(gres.configured["matlab"], 0);
        assert_eq!(gres.available["gpu"], 7);
    }

    #[test]
    fn from_config_registers_in_file_order() {
        let config = SchedulerConfig::from_toml_str(
            r#"
[[resource_manager]]
name = "xcat"
type = "provisioning"

[[resource_manager]]
name = "pbs"

[[partition]]
name = "batch"
access_policy = "singleuser"
"#,
        )
        .unwrap();
        let state = ClusterState::from_config(&config).unwrap();
        assert_eq!(state.rm_names(), vec!["xcat", "pbs"]);
        assert!(state.partition(Some("batch")).is_some());
        assert!(state.partition(None).is_none());
    }

    #[test]
    fn total_configured_sums_nodes() {
        let mut state = ClusterState::new();
        state.upsert_node("a").configured = Resources::procs(4).with_memory(100);
        state.upsert_node("b").configured = Resources::procs(2);
        let total = state.total_configured();
        assert_eq!(total.procs, 6);
        assert_eq!(total.memory, 100);
    }
}
