//! Resource vectors (procs, memory, disk, swap, generic resources).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A resource vector. Memory, disk, and swap are in MB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub procs: u32,
    pub memory: u64,
    pub disk: u64,
    pub swap: u64,
    /// Named generic resources (licenses, GPUs, ...).
    pub generic: BTreeMap<String, u64>,
}

impl Resources {
    pub fn procs(procs: u32) -> Self {
        Self {
            procs,
            ..Self::default()
        }
    }

    pub fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_disk(mut self, disk: u64) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_generic(mut self, name: &str, count: u64) -> Self {
        self.generic.insert(name.to_string(), count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.procs == 0
            && self.memory == 0
            && self.disk == 0
            && self.swap == 0
            && self.generic.values().all(|c| *c == 0)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add `times` copies of `other` into `self`.
    pub fn add_scaled(&mut self, other: &Resources, times: u32) {
        let t = u64::from(times);
        self.procs = self.procs.saturating_add(other.procs.saturating_mul(times));
        self.memory = self.memory.saturating_add(other.memory.saturating_mul(t));
        self.disk = self.disk.saturating_add(other.disk.saturating_mul(t));
        self.swap = self.swap.saturating_add(other.swap.saturating_mul(t));
        for (name, count) in &other.generic {
            let slot = self.generic.entry(name.clone()).or_insert(0);
            *slot = slot.saturating_add(count.saturating_mul(t));
        }
    }
}
