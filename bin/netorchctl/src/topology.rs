//! ---
//! netorch_section: "07-control-cli"
//! netorch_subsection: "binary"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Topology file model consumed by deploy and teardown."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use netorch_devices::{DeviceConfig, DeviceId};
use netorch_topology::LinkSpec;
use serde::Deserialize;

/// Devices and links to deploy together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    /// Project the devices belong to; the `--project` flag takes precedence.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl TopologyFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read topology file {}", path.display()))?;
        let topology: TopologyFile = toml::from_str(&contents)
            .with_context(|| format!("invalid topology file {}", path.display()))?;
        topology.validate()?;
        Ok(topology)
    }

    /// Links may only name devices declared with an explicit `id`.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                bail!("device of type {} has an empty name", device.device_type);
            }
            if let Some(id) = &device.id {
                if !ids.insert(id.clone()) {
                    bail!("device id {id} is declared twice");
                }
            }
        }
        for link in &self.links {
            for endpoint in [&link.a, &link.b] {
                if !ids.contains(&endpoint.device) {
                    bail!("link endpoint {endpoint} names an undeclared device");
                }
            }
        }
        Ok(())
    }

    /// Identities of every device, required for teardown.
    pub fn device_ids(&self) -> Result<Vec<DeviceId>> {
        self.devices
            .iter()
            .map(|device| {
                device
                    .id
                    .clone()
                    .with_context(|| format!("device {} has no id and cannot be torn down", device.name))
            })
            .collect()
    }

    pub fn project_or(&self, flag: Option<&str>) -> String {
        flag.map(str::to_owned)
            .or_else(|| self.project.clone())
            .unwrap_or_else(|| "default".to_owned())
    }
}
