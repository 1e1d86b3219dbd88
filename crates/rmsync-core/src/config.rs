//! rmsync.toml configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::limits::{CredentialLimits, NodeLimits, SchedulerDefaults};
use crate::resources::Resources;
use crate::types::{Capability, NodeAccessPolicy, NodeState, NodeStatePolicy, RmKind, RmState};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_RM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Registration order is file order.
    #[serde(default, rename = "resource_manager")]
    pub resource_managers: Vec<RmConfig>,
    #[serde(default, rename = "partition")]
    pub partitions: Vec<PartitionConfig>,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
    #[serde(default, rename = "license")]
    pub licenses: Vec<LicenseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub poll_interval: String,
    pub default_access_policy: Option<NodeAccessPolicy>,
    pub shared_partition: Option<String>,
    pub license_proc_limit: Option<u32>,
    pub max_failure_history: usize,
    pub default_node: NodeLimits,
    pub default_node_policy: Option<CredentialLimits>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval: "30s".to_string(),
            default_access_policy: None,
            shared_partition: None,
            license_proc_limit: None,
            max_failure_history: 16,
            default_node: NodeLimits::default(),
            default_node_policy: None,
        }
    }
}

/// Per-RM behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmFlag {
    /// Another scheduler drives this RM; never polled from here.
    Client,
    /// One-time source.
    Static,
    /// Jobs from this RM are not counted toward iteration totals.
    NoCreateAll,
    FlushResourcesWhenDown,
    License,
    /// Configuration template, not a live interface.
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: RmKind,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub node_state_policy: Option<NodeStatePolicy>,
    #[serde(default)]
    pub flags: Vec<RmFlag>,
    /// Explicit allow-list; empty means whatever the driver implements.
    #[serde(default)]
    pub functions: Vec<Capability>,
    #[serde(default)]
    pub state: Option<RmState>,
}

impl RmConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_RM_TIMEOUT)
    }

    pub fn has_flag(&self, flag: RmFlag) -> bool {
        self.flags.contains(&flag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    #[serde(default)]
    pub access_policy: Option<NodeAccessPolicy>,
}

/// A node known to a static resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    /// Name of the RM that reports this node.
    pub rm: String,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default = "default_node_state")]
    pub state: NodeState,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub access_policy: Option<NodeAccessPolicy>,
    #[serde(default)]
    pub limits: NodeLimits,
    #[serde(default)]
    pub policy: Option<CredentialLimits>,
    #[serde(default)]
    pub messages: Vec<String>,
}

fn default_node_state() -> NodeState {
    NodeState::Idle
}

/// A job known to a static resource manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub rm: String,
    pub user: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub qos: Option<String>,
    #[serde(default)]
    pub qos_dedicated: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub per_task: Resources,
    #[serde(default)]
    pub access_policy: Option<NodeAccessPolicy>,
    /// Node id → task count.
    #[serde(default)]
    pub tasks: BTreeMap<String, u32>,
}

/// A license pool advertised by a license RM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseConfig {
    pub name: String,
    pub rm: String,
    pub count: u64,
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate RM names and dangling RM references.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for rm in &self.resource_managers {
            if !seen.insert(rm.name.as_str()) {
                return Err(ConfigError::DuplicateResourceManager(rm.name.clone()));
            }
        }
        for node in &self.nodes {
            if !seen.contains(node.rm.as_str()) {
                return Err(ConfigError::UnknownResourceManager {
                    node: node.id.clone(),
                    rm: node.rm.clone(),
                });
            }
        }
        if parse_duration(&self.scheduler.poll_interval).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval",
                value: self.scheduler.poll_interval.clone(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.scheduler.poll_interval).unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn defaults(&self) -> SchedulerDefaults {
        SchedulerDefaults {
            access_policy: self.scheduler.default_access_policy,
            shared_partition: self.scheduler.shared_partition.clone(),
            node_limits: self.scheduler.default_node,
            credential_limits: self.scheduler.default_node_policy,
            license_proc_limit: self.scheduler.license_proc_limit,
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m", or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
