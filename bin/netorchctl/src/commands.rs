//! ---
//! netorch_section: "07-control-cli"
//! netorch_subsection: "binary"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Health, deploy and teardown command handlers."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use netorch_common::config::AppConfig;
use netorch_compute::{ComputeDirectory, Reachability};
use netorch_devices::{DeviceConfig, ProjectId};
use netorch_orchestrator::LifecycleOrchestrator;
use netorch_topology::{LinkSpec, TopologyCoordinator};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::topology::TopologyFile;

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Exit non-zero when any compute is unreachable.
    #[arg(long)]
    pub strict: bool,
}

impl HealthArgs {
    pub async fn execute(self, config: &AppConfig) -> Result<()> {
        let computes = ComputeDirectory::from_config(config)?;
        let checks = computes.check_all().await;
        let unreachable = checks
            .iter()
            .filter(|(_, reachability)| *reachability != Reachability::Reachable)
            .count();
        let report: Vec<Value> = checks
            .iter()
            .map(|(id, reachability)| {
                let host = computes.get(id).map(|handle| handle.host().to_owned());
                json!({"compute": id, "host": host, "reachability": reachability})
            })
            .collect();
        print_json(&Value::Array(report))?;
        if self.strict && unreachable > 0 {
            bail!("{unreachable} compute(s) unreachable");
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Topology file listing devices and links.
    #[arg(value_name = "TOPOLOGY")]
    pub topology: PathBuf,
    /// Start every device once links are in place.
    #[arg(long)]
    pub start: bool,
}

impl DeployArgs {
    pub async fn execute(self, config: &AppConfig, project: Option<&str>) -> Result<()> {
        let topology = TopologyFile::load(&self.topology)?;
        let orchestrator = build_orchestrator(config, &topology.project_or(project))?;
        let coordinator = TopologyCoordinator::new(Arc::clone(&orchestrator), &config.links);
        info!(
            project = %orchestrator.project_id(),
            devices = topology.devices.len(),
            links = topology.links.len(),
            "deploying topology"
        );

        let mut failures = 0;
        let mut devices = Vec::with_capacity(topology.devices.len());
        for device in topology.devices {
            let label = device_label(&device);
            match orchestrator.create(device).await {
                Ok(record) => devices.push(json!({
                    "device": record.id(),
                    "ok": true,
                    "status": record.status(),
                })),
                Err(err) => {
                    failures += 1;
                    devices.push(json!({
                        "device": label,
                        "ok": false,
                        "error": err.to_string(),
                        "retryable": err.is_retryable(),
                    }));
                }
            }
        }

        let mut links = Vec::with_capacity(topology.links.len());
        for spec in topology.links {
            let label = link_label(&spec);
            match coordinator.create_link(spec).await {
                Ok(link) => links.push(json!({"link": label, "ok": true, "id": link.id})),
                Err(err) => {
                    failures += 1;
                    warn!(link = %label, error = %err, "link not established");
                    links.push(json!({
                        "link": label,
                        "ok": false,
                        "error": err.to_string(),
                        "retryable": err.is_retryable(),
                    }));
                }
            }
        }

        let started = if self.start {
            let report = orchestrator.start_all().await;
            failures += report.failures().count();
            report.to_json()
        } else {
            Value::Null
        };

        print_json(&json!({
            "project": orchestrator.project_id(),
            "devices": devices,
            "links": links,
            "start": started,
        }))?;
        if failures > 0 {
            bail!("deploy finished with {failures} failure(s)");
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct TeardownArgs {
    /// Topology file previously deployed.
    #[arg(value_name = "TOPOLOGY")]
    pub topology: PathBuf,
}

impl TeardownArgs {
    pub async fn execute(self, config: &AppConfig, project: Option<&str>) -> Result<()> {
        let topology = TopologyFile::load(&self.topology)?;
        // Fail before touching any compute when an identity is missing.
        topology.device_ids()?;
        let orchestrator = build_orchestrator(config, &topology.project_or(project))?;
        for device in topology.devices {
            orchestrator.adopt(device)?;
        }
        let coordinator = TopologyCoordinator::new(orchestrator, &config.links);
        let report = coordinator.close_project().await;
        print_json(&report.to_json())?;
        if !report.is_success() {
            bail!("teardown left {} device(s) behind", report.failures().count());
        }
        Ok(())
    }
}

fn build_orchestrator(config: &AppConfig, project: &str) -> Result<Arc<LifecycleOrchestrator>> {
    let computes = ComputeDirectory::from_config(config)?;
    Ok(Arc::new(LifecycleOrchestrator::new(
        ProjectId::new(project),
        computes,
        config.orchestrator.clone(),
    )))
}

fn device_label(device: &DeviceConfig) -> String {
    device
        .id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| device.name.clone())
}

fn link_label(spec: &LinkSpec) -> String {
    format!("{} <-> {}", spec.a, spec.b)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
