//! Resource-manager records and their failure bookkeeping.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use rmsync_core::{
    Capability, NodeStatePolicy, RmConfig, RmFlag, RmKind, RmState, StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::types::RmName;

/// Boolean view of the configured RM flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmFlags {
    pub client: bool,
    pub static_source: bool,
    pub no_create_all: bool,
    pub flush_resources_when_down: bool,
    pub license: bool,
    pub template: bool,
}

impl RmFlags {
    pub fn from_list(flags: &[RmFlag]) -> Self {
        let mut out = Self::default();
        for flag in flags {
            match flag {
                RmFlag::Client => out.client = true,
                RmFlag::Static => out.static_source = true,
                RmFlag::NoCreateAll => out.no_create_all = true,
                RmFlag::FlushResourcesWhenDown => out.flush_resources_when_down = true,
                RmFlag::License => out.license = true,
                RmFlag::Template => out.template = true,
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub time: u64,
    pub iteration: u64,
    pub function: Capability,
    /// Failure classification; every failed query is a system failure.
    pub code: StatusCode,
    /// Status the driver reported, or `Timeout` for an expired deadline.
    pub cause: StatusCode,
    pub message: String,
}

/// Bounded failure history for one RM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLog {
    capacity: usize,
    records: VecDeque<FailureRecord>,
    per_function: BTreeMap<Capability, u64>,
    /// Total failures since registration.
    pub fail_count: u64,
    /// Iteration of the most recent failure.
    pub fail_iteration: Option<u64>,
    /// Outstanding message shown to operators.
    pub last_message: Option<String>,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
            per_function: BTreeMap::new(),
            fail_count: 0,
            fail_iteration: None,
            last_message: None,
        }
    }

    pub fn record(&mut self, record: FailureRecord) {
        self.fail_count += 1;
        self.fail_iteration = Some(record.iteration);
        *self.per_function.entry(record.function).or_default() += 1;
        self.last_message = Some(record.message.clone());
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn count_for(&self, function: Capability) -> u64 {
        self.per_function.get(&function).copied().unwrap_or(0)
    }

    /// Oldest first.
    pub fn records(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&FailureRecord> {
        self.records.back()
    }

    pub fn clear_message(&mut self) {
        self.last_message = None;
    }
}

/// One configured backend connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManager {
    pub name: RmName,
    pub kind: RmKind,
    pub subtype: Option<String>,
    pub timeout: Duration,
    pub node_state_policy: Option<NodeStatePolicy>,
    pub flags: RmFlags,
    /// Allow-list of capabilities. Empty means whatever the driver implements.
    pub functions: BTreeSet<Capability>,
    pub state: RmState,
    /// Latched on the first successful cluster query.
    pub first_contact: bool,
    pub last_contact: Option<u64>,
    pub node_count: u32,
    pub job_count: u32,
    /// New jobs reported by the last workload query.
    pub job_new_count: u32,
    pub class_count: u32,
    pub failures: FailureLog,
}

impl ResourceManager {
    pub fn new(name: impl Into<RmName>, kind: RmKind) -> Self {
        Self {
            name: name.into(),
            kind,
            subtype: None,
            timeout: Duration::from_secs(30),
            node_state_policy: None,
            flags: RmFlags::default(),
            functions: BTreeSet::new(),
            state: RmState::Configured,
            first_contact: false,
            last_contact: None,
            node_count: 0,
            job_count: 0,
            job_new_count: 0,
            class_count: 0,
            failures: FailureLog::new(16),
        }
    }

    pub fn from_config(config: &RmConfig, history: usize) -> Self {
        Self {
            subtype: config.subtype.clone(),
            timeout: config.timeout(),
            node_state_policy: config.node_state_policy,
            flags: RmFlags::from_list(&config.flags),
            functions: config.functions.iter().copied().collect(),
            state: config.state.unwrap_or_default(),
            failures: FailureLog::new(history),
            ..Self::new(config.name.clone(), config.kind)
        }
    }

    /// Templates describe other RMs and are never polled.
    pub fn is_real(&self) -> bool {
        !self.flags.template
    }

    pub fn is_license_source(&self) -> bool {
        self.kind == RmKind::License || self.flags.license
    }

    /// The allow-list permits `capability`.
    pub fn allows(&self, capability: Capability) -> bool {
        self.functions.is_empty() || self.functions.contains(&capability)
    }
}
