//! ---
//! netorch_section: "08-testing"
//! netorch_subsection: "integration-tests"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "End-to-end deployment tests across the netorch crates."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use netorch_common::config::{AppConfig, BusyPolicy};
use netorch_compute::HttpMethod;
use netorch_devices::{DeviceConfig, DeviceId, DeviceStatus, ProjectId};
use netorch_orchestrator::{BatchOperation, LifecycleOrchestrator};
use netorch_testharness::{directory, RecordingTransport, Reply};
use netorch_topology::{LinkSpec, TopologyCoordinator};
use serde::Deserialize;
use serde_json::json;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[derive(Debug, Deserialize)]
struct Topology {
    project: String,
    devices: Vec<DeviceConfig>,
    links: Vec<LinkSpec>,
}

struct Lab {
    config: AppConfig,
    topology: Topology,
    local: Arc<RecordingTransport>,
    remote: Arc<RecordingTransport>,
    coordinator: TopologyCoordinator,
}

fn lab() -> Lab {
    let config: AppConfig = read("config/netorch.example.toml")
        .parse()
        .expect("example config");
    let topology: Topology =
        toml::from_str(&read("config/lab.topology.toml")).expect("example topology");
    let local = RecordingTransport::new();
    let remote = RecordingTransport::new();
    let computes = directory([
        ("local", config.computes["local"].host.as_str(), Arc::clone(&local)),
        ("lab-2", config.computes["lab-2"].host.as_str(), Arc::clone(&remote)),
    ]);
    let orchestrator = Arc::new(LifecycleOrchestrator::new(
        ProjectId::new(topology.project.clone()),
        computes,
        config.orchestrator.clone(),
    ));
    let coordinator = TopologyCoordinator::new(orchestrator, &config.links);
    Lab {
        config,
        topology,
        local,
        remote,
        coordinator,
    }
}

#[test]
fn example_config_is_valid() {
    let config: AppConfig = read("config/netorch.example.toml")
        .parse()
        .expect("example config");
    assert_eq!(
        config.computes.keys().collect::<Vec<_>>(),
        vec!["local", "lab-2"]
    );
    let lab_2 = config.compute("lab-2").expect("lab-2");
    assert_eq!(lab_2.user.as_deref(), Some("admin"));
    assert_eq!(lab_2.api_prefix, "/v2/compute");
    assert_eq!(config.orchestrator.busy_policy, BusyPolicy::Reject);
    assert_eq!(config.orchestrator.request_timeout, Duration::from_secs(30));
    assert_eq!(config.links.udp_port_start, 10000);
}

#[test]
fn config_file_with_inverted_port_range_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        "[computes.local]\nhost = \"127.0.0.1\"\n\n[links]\nudp_port_start = 20000\nudp_port_end = 10000"
    )
    .expect("write");
    let err = AppConfig::from_path(file.path()).expect_err("inverted range");
    assert!(format!("{err:#}").contains("udp port range"));
}

#[tokio::test]
async fn deploy_link_start_and_close_the_example_lab() {
    let lab = lab();
    let orchestrator = Arc::clone(lab.coordinator.orchestrator());

    for device in &lab.topology.devices {
        let record = orchestrator.create(device.clone()).await.expect("create");
        assert_eq!(record.status(), DeviceStatus::Created);
    }
    assert_eq!(
        lab.local.count_matching(HttpMethod::Post, "/projects/lab/iou/vms"),
        1
    );
    assert_eq!(
        lab.remote.calls()[0].body.as_ref().and_then(|body| body.get("ram")),
        Some(&json!(512))
    );

    lab.local.clear_calls();
    lab.remote.clear_calls();
    for spec in &lab.topology.links {
        lab.coordinator
            .create_link(spec.clone())
            .await
            .expect("link");
    }

    // edge-1/core-1: core-1 sorts first, each side gets the first free port.
    let remote_calls = lab.remote.calls();
    assert_eq!(
        remote_calls[0].path,
        "/projects/lab/qemu/vms/core-1/adapters/0/ports/0/nio"
    );
    assert_eq!(
        remote_calls[0].body,
        Some(json!({"type": "nio_udp", "lport": 10000, "rhost": "127.0.0.1", "rport": 10000}))
    );
    // pc-1/edge-1 share the local compute and take the next two ports.
    let local_calls = lab.local.calls();
    assert_eq!(local_calls.len(), 3);
    assert_eq!(
        local_calls[1].path,
        "/projects/lab/iou/vms/edge-1/adapters/1/ports/0/nio"
    );
    assert_eq!(
        local_calls[1].body,
        Some(json!({"type": "nio_udp", "lport": 10001, "rhost": "127.0.0.1", "rport": 10002}))
    );
    assert_eq!(
        local_calls[2].path,
        "/projects/lab/vpcs/vms/pc-1/adapters/0/ports/0/nio"
    );
    assert_eq!(lab.coordinator.links().len(), 2);

    let report = orchestrator.start_all().await;
    assert!(report.is_success(), "{}", report.to_json());
    for id in ["edge-1", "core-1", "pc-1"] {
        assert_eq!(
            orchestrator.find(&DeviceId::new(id)).expect("device").status(),
            DeviceStatus::Started
        );
    }
    assert!(lab.local.max_in_flight() <= lab.config.orchestrator.max_concurrency);

    let project = orchestrator.project_json().expect("project json");
    assert_eq!(project.as_array().map(Vec::len), Some(3));
    assert_eq!(project[1]["vm_type"], json!("qemu"));

    let closed = lab.coordinator.close_project().await;
    assert_eq!(closed.operation, BatchOperation::Destroy);
    assert!(closed.is_success());
    assert!(lab.coordinator.links().is_empty());
    assert_eq!(
        orchestrator.registry().status_of(&DeviceId::new("core-1")),
        Some(DeviceStatus::Destroyed)
    );
    // Links go first, then the devices themselves.
    assert_eq!(lab.remote.count_matching(HttpMethod::Delete, "/nio"), 1);
    assert_eq!(lab.local.count_matching(HttpMethod::Delete, "/nio"), 3);
    assert_eq!(lab.remote.count_matching(HttpMethod::Delete, "/vms/"), 2);
    assert_eq!(lab.local.count_matching(HttpMethod::Delete, "/vms/"), 5);
}

#[tokio::test]
async fn teardown_of_adopted_devices_tolerates_missing_remotes() {
    let lab = lab();
    let orchestrator = Arc::clone(lab.coordinator.orchestrator());
    lab.remote.on(HttpMethod::Delete, "/vms/core-1", Reply::Status(404));

    for device in &lab.topology.devices {
        orchestrator.adopt(device.clone()).expect("adopt");
    }
    assert_eq!(lab.local.call_count() + lab.remote.call_count(), 0);

    let report = lab.coordinator.close_project().await;
    assert!(report.is_success(), "{}", report.to_json());
    assert_eq!(report.succeeded().count(), 3);
    assert!(orchestrator.devices().is_empty());
}

#[tokio::test]
async fn unreachable_compute_fails_only_its_devices() {
    let lab = lab();
    let orchestrator = Arc::clone(lab.coordinator.orchestrator());
    lab.remote.on(HttpMethod::Post, "/vms", Reply::ConnectError);

    let mut created = Vec::new();
    for device in &lab.topology.devices {
        if let Ok(record) = orchestrator.create(device.clone()).await {
            created.push(record.id().clone());
        }
    }
    assert_eq!(created, vec![DeviceId::new("edge-1"), DeviceId::new("pc-1")]);
    assert!(!orchestrator.registry().contains(&DeviceId::new("core-1")));

    let err = lab
        .coordinator
        .create_link(lab.topology.links[0].clone())
        .await
        .expect_err("core-1 was never created");
    assert!(err.to_string().contains("core-1"));
    lab.coordinator
        .create_link(lab.topology.links[1].clone())
        .await
        .expect("local link");
}
