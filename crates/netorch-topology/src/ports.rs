//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};

use netorch_common::config::LinksConfig;

/// Hands out UDP tunnel ports per compute from a shared inclusive range.
#[derive(Debug, Clone)]
pub struct UdpPortAllocator {
    start: u16,
    end: u16,
    used: HashMap<String, BTreeSet<u16>>,
}

impl UdpPortAllocator {
    pub fn new(config: &LinksConfig) -> Self {
        Self {
            start: config.udp_port_start,
            end: config.udp_port_end,
            used: HashMap::new(),
        }
    }

    /// Lowest free port on `compute`, or `None` when the range is exhausted.
    pub fn allocate(&mut self, compute: &str) -> Option<u16> {
        let used = self.used.entry(compute.to_owned()).or_default();
        let port = (self.start..=self.end).find(|port| !used.contains(port))?;
        used.insert(port);
        Some(port)
    }

    pub fn release(&mut self, compute: &str, port: u16) {
        if let Some(used) = self.used.get_mut(compute) {
            used.remove(&port);
        }
    }

    /// Ports currently held on `compute`.
    pub fn in_use(&self, compute: &str) -> usize {
        self.used.get(compute).map_or(0, BTreeSet::len)
    }
}
