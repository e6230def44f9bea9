//! ---
//! netorch_section: "05-lifecycle-orchestration"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Lifecycle orchestration of devices across compute backends."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use netorch_common::config::{BusyPolicy, OrchestratorConfig};
use netorch_compute::{HttpMethod, Reachability};
use netorch_devices::{ConsoleType, DeviceConfig, DeviceId, DeviceStatus, DeviceUpdate, ProjectId};
use netorch_orchestrator::{
    BatchOperation, LifecycleError, LifecycleOrchestrator, Operation, PlacementReason,
};
use netorch_testharness::{directory, RecordingTransport, Reply};
use serde_json::{json, Value};

fn orchestrator_with(config: OrchestratorConfig) -> (LifecycleOrchestrator, Arc<RecordingTransport>) {
    let transport = RecordingTransport::new();
    let computes = directory([("local", "10.0.0.5", Arc::clone(&transport))]);
    (
        LifecycleOrchestrator::new(ProjectId::new("lab"), computes, config),
        transport,
    )
}

fn orchestrator() -> (LifecycleOrchestrator, Arc<RecordingTransport>) {
    orchestrator_with(OrchestratorConfig::default())
}

fn vpcs(id: &str) -> DeviceConfig {
    DeviceConfig::new(format!("PC-{id}"), "vpcs", "local").with_id(id)
}

async fn created(orch: &LifecycleOrchestrator, ids: &[&str]) -> Vec<DeviceId> {
    let mut out = Vec::new();
    for id in ids {
        let record = orch.create(vpcs(id)).await.expect("create");
        out.push(record.id().clone());
    }
    out
}

#[tokio::test]
async fn create_writes_back_confirmed_fields_without_nulls() {
    let (orch, transport) = orchestrator();
    transport.once(
        HttpMethod::Post,
        "/projects/lab/qemu/vms",
        Reply::Json(json!({
            "vm_id": "ignored",
            "name": "R1",
            "console": 5004,
            "console_type": "telnet",
            "status": "stopped",
            "vm_directory": "/opt/gns3/projects/lab/qemu/r1",
            "ram": 512,
            "hda_disk_image": null,
            "mac_address": "0c:7e:00:00:00:00"
        })),
    );
    let config = DeviceConfig::new("R1", "qemu", "local")
        .with_id("r1")
        .with_property("ram", 256)
        .with_property("hda_disk_image", Value::Null)
        .without_property("cdrom_image");

    let record = orch.create(config).await.expect("create");
    assert_eq!(record.status(), DeviceStatus::Stopped);

    let found = orch.find(&DeviceId::new("r1")).expect("find");
    assert_eq!(found.console(), Some(5004));
    assert_eq!(found.console_type(), Some(ConsoleType::Telnet));
    assert!(found.properties().iter().all(|(_, value)| !value.is_null()));
    assert_eq!(
        found.properties().keys().collect::<Vec<_>>(),
        vec!["ram", "mac_address"]
    );
    assert_eq!(found.properties().get("ram"), Some(&json!(512)));

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/projects/lab/qemu/vms");
    assert_eq!(
        calls[0].body,
        Some(json!({"ram": 256, "name": "R1", "vm_id": "r1"}))
    );
}

#[tokio::test]
async fn rejected_create_rolls_back_registration() {
    let (orch, transport) = orchestrator();
    transport.once(HttpMethod::Post, "/projects/lab/vpcs/vms", Reply::Status(409));

    let err = orch.create(vpcs("a")).await.expect_err("rejected");
    assert!(matches!(
        err,
        LifecycleError::Validation {
            operation: Operation::Create,
            ..
        }
    ));
    assert!(!err.is_retryable());
    assert_eq!(orch.registry().status_of(&DeviceId::new("a")), None);

    let record = orch.create(vpcs("a")).await.expect("retry");
    assert_eq!(record.status(), DeviceStatus::Created);
}

#[tokio::test]
async fn duplicate_create_fails_locally() {
    let (orch, transport) = orchestrator();
    created(&orch, &["a"]).await;
    let err = orch.create(vpcs("a")).await.expect_err("duplicate");
    assert_eq!(err, LifecycleError::DuplicateIdentity(DeviceId::new("a")));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn placement_requires_known_reachable_compute() {
    let (orch, transport) = orchestrator();
    let err = orch
        .create(DeviceConfig::new("PC", "vpcs", "elsewhere"))
        .await
        .expect_err("unknown compute");
    assert!(matches!(
        err,
        LifecycleError::Placement {
            reason: PlacementReason::UnknownCompute,
            ..
        }
    ));

    orch.computes()
        .get("local")
        .expect("local")
        .set_reachability(Reachability::Unreachable);
    let err = orch.create(vpcs("a")).await.expect_err("unreachable");
    assert!(matches!(
        err,
        LifecycleError::Placement {
            reason: PlacementReason::Unreachable,
            ..
        }
    ));
    assert_eq!(transport.call_count(), 0);
    assert!(orch.devices().is_empty());
}

#[tokio::test]
async fn connect_failure_on_create_is_a_placement_error() {
    let (orch, transport) = orchestrator();
    transport.once(HttpMethod::Post, "/projects/lab/vpcs/vms", Reply::ConnectError);
    let err = orch.create(vpcs("a")).await.expect_err("refused");
    assert!(matches!(
        err,
        LifecycleError::Placement {
            reason: PlacementReason::ConnectFailed,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn update_merges_only_supplied_attributes() {
    let (orch, transport) = orchestrator();
    let id = DeviceId::new("a");
    orch.create(vpcs("a").with_property("startup_script", "ip 10.0.0.1/24"))
        .await
        .expect("create");

    let record = orch
        .update(&id, DeviceUpdate::new().name("edge"))
        .await
        .expect("rename");
    assert_eq!(record.name(), "edge");
    assert_eq!(
        record.properties().get("startup_script"),
        Some(&json!("ip 10.0.0.1/24"))
    );

    let calls = transport.calls();
    let put = calls.last().expect("put");
    assert_eq!(put.method, HttpMethod::Put);
    assert_eq!(put.path, "/projects/lab/vpcs/vms/a");
    assert_eq!(put.body, Some(json!({"name": "edge"})));

    let record = orch
        .update(&id, DeviceUpdate::new().clear_property("startup_script"))
        .await
        .expect("clear");
    assert!(record.properties().is_empty());
    let calls = transport.calls();
    assert_eq!(
        calls.last().and_then(|call| call.body.clone()),
        Some(json!({"startup_script": null}))
    );
}

#[tokio::test]
async fn cleared_property_kept_when_compute_still_reports_it() {
    let (orch, transport) = orchestrator();
    let id = DeviceId::new("a");
    orch.create(vpcs("a").with_property("startup_script", "ip 10.0.0.1/24"))
        .await
        .expect("create");
    transport.once(
        HttpMethod::Put,
        "/vms/a",
        Reply::Json(json!({"name": "PC-a", "startup_script": "ip 10.0.0.1/24"})),
    );

    let record = orch
        .update(&id, DeviceUpdate::new().clear_property("startup_script"))
        .await
        .expect("clear");
    assert_eq!(
        record.properties().get("startup_script"),
        Some(&json!("ip 10.0.0.1/24"))
    );
}

#[tokio::test]
async fn failed_update_leaves_record_untouched() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);
    transport.once(HttpMethod::Put, "/vms/a", Reply::Status(500));

    let err = orch
        .update(&id, DeviceUpdate::new().name("renamed").property("ram", 64))
        .await
        .expect_err("server error");
    assert!(matches!(err, LifecycleError::RemoteFault { .. }));
    let record = orch.find(&id).expect("find");
    assert_eq!(record.name(), "PC-a");
    assert!(!record.properties().contains_key("ram"));
}

#[tokio::test]
async fn power_actions_follow_transition_table() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);

    assert_eq!(orch.start(&id).await.expect("start").status(), DeviceStatus::Started);
    assert_eq!(orch.suspend(&id).await.expect("suspend").status(), DeviceStatus::Suspended);
    let err = orch.reload(&id).await.expect_err("reload while suspended");
    assert_eq!(
        err,
        LifecycleError::InvalidTransition {
            device: id.clone(),
            operation: Operation::Reload,
            status: DeviceStatus::Suspended,
        }
    );
    assert_eq!(orch.start(&id).await.expect("resume").status(), DeviceStatus::Started);
    assert_eq!(orch.reload(&id).await.expect("reload").status(), DeviceStatus::Started);
    assert_eq!(orch.stop(&id).await.expect("stop").status(), DeviceStatus::Stopped);
    assert!(orch.stop(&id).await.is_err());

    let paths: Vec<String> = transport
        .calls()
        .into_iter()
        .skip(1)
        .map(|call| call.path)
        .collect();
    assert_eq!(
        paths,
        vec![
            "/projects/lab/vpcs/vms/a/start",
            "/projects/lab/vpcs/vms/a/suspend",
            "/projects/lab/vpcs/vms/a/start",
            "/projects/lab/vpcs/vms/a/reload",
            "/projects/lab/vpcs/vms/a/stop",
        ]
    );
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);

    orch.destroy(&id).await.expect("first destroy");
    orch.destroy(&id).await.expect("second destroy");
    orch.destroy(&DeviceId::new("never-seen")).await.expect("absent");

    assert_eq!(transport.count_matching(HttpMethod::Delete, "/vms/a"), 1);
    assert_eq!(orch.registry().status_of(&id), Some(DeviceStatus::Destroyed));
}

#[tokio::test]
async fn destroy_treats_not_found_as_success() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);
    transport.on(HttpMethod::Delete, "/vms/a", Reply::Status(404));
    orch.destroy(&id).await.expect("404 is success");
    assert!(orch.devices().is_empty());
}

#[tokio::test]
async fn pending_device_is_destroyed_without_remote_call() {
    let (orch, transport) = orchestrator();
    let record = orch.registry().register(vpcs("p")).expect("register");
    orch.destroy(record.id()).await.expect("destroy");
    assert_eq!(transport.call_count(), 0);
    assert_eq!(
        orch.registry().status_of(record.id()),
        Some(DeviceStatus::Destroyed)
    );
}

#[tokio::test]
async fn stop_on_destroyed_device_never_reaches_the_compute() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);
    orch.destroy(&id).await.expect("destroy");
    let before = transport.call_count();

    let err = orch.stop(&id).await.expect_err("destroyed");
    assert_eq!(
        err,
        LifecycleError::InvalidTransition {
            device: id.clone(),
            operation: Operation::Stop,
            status: DeviceStatus::Destroyed,
        }
    );
    assert_eq!(transport.call_count(), before);

    let err = orch.start(&DeviceId::new("ghost")).await.expect_err("unknown");
    assert_eq!(err, LifecycleError::NotFound(DeviceId::new("ghost")));
}

#[tokio::test]
async fn apply_all_isolates_failures_and_keeps_order() {
    let (orch, transport) = orchestrator();
    let ids = created(&orch, &["a", "b", "c"]).await;
    transport.on(HttpMethod::Post, "/vms/b/start", Reply::Status(500).after(Duration::from_millis(5)));

    let report = orch.apply_all(BatchOperation::Start, &ids).await;
    let order: Vec<&str> = report.items.iter().map(|item| item.device.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(matches!(report.items[0].outcome, Ok(DeviceStatus::Started)));
    assert!(matches!(
        report.items[1].outcome,
        Err(LifecycleError::RemoteFault { .. })
    ));
    assert!(matches!(report.items[2].outcome, Ok(DeviceStatus::Started)));
    assert_eq!(report.failures().count(), 1);

    assert_eq!(orch.find(&ids[1]).expect("b").status(), DeviceStatus::Created);
    assert_eq!(orch.find(&ids[2]).expect("c").status(), DeviceStatus::Started);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_fan_out_respects_concurrency_limit() {
    let config = OrchestratorConfig {
        max_concurrency: 2,
        ..OrchestratorConfig::default()
    };
    let (orch, transport) = orchestrator_with(config);
    created(&orch, &["a", "b", "c", "d", "e", "f"]).await;
    transport.set_latency(Duration::from_millis(20));

    let report = orch.start_all().await;
    assert!(report.is_success());
    assert_eq!(transport.max_in_flight(), 2);
    assert_eq!(transport.count_matching(HttpMethod::Post, "/start"), 6);
}

#[tokio::test]
async fn concurrent_start_is_rejected_under_reject_policy() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);
    transport.set_latency(Duration::from_millis(30));

    let (first, second) = tokio::join!(orch.start(&id), orch.start(&id));
    assert_eq!(first.expect("first").status(), DeviceStatus::Started);
    let err = second.expect_err("second");
    assert_eq!(
        err,
        LifecycleError::ConcurrentOperation {
            device: id.clone(),
            operation: Operation::Start,
        }
    );
    assert!(err.is_retryable());
    assert_eq!(transport.count_matching(HttpMethod::Post, "/start"), 1);
}

#[tokio::test]
async fn concurrent_start_observes_first_outcome_under_queue_policy() {
    let config = OrchestratorConfig {
        busy_policy: BusyPolicy::Queue,
        ..OrchestratorConfig::default()
    };
    let (orch, transport) = orchestrator_with(config);
    let id = created(&orch, &["a"]).await.remove(0);
    transport.set_latency(Duration::from_millis(30));

    let (first, second) = tokio::join!(orch.start(&id), orch.start(&id));
    assert_eq!(first.expect("first").status(), DeviceStatus::Started);
    assert_eq!(second.expect("second").status(), DeviceStatus::Started);
    assert_eq!(transport.count_matching(HttpMethod::Post, "/start"), 1);
}

#[tokio::test]
async fn queued_stop_revalidates_after_destroy() {
    let config = OrchestratorConfig {
        busy_policy: BusyPolicy::Queue,
        ..OrchestratorConfig::default()
    };
    let (orch, transport) = orchestrator_with(config);
    let id = created(&orch, &["a"]).await.remove(0);
    transport.set_latency(Duration::from_millis(30));

    let (destroyed, stopped) = tokio::join!(orch.destroy(&id), orch.stop(&id));
    destroyed.expect("destroy");
    assert!(matches!(
        stopped,
        Err(LifecycleError::InvalidTransition {
            status: DeviceStatus::Destroyed,
            ..
        })
    ));
    assert_eq!(transport.count_matching(HttpMethod::Post, "/stop"), 0);
}

#[tokio::test]
async fn cancelled_operation_leaves_status_and_frees_device() {
    let (orch, transport) = orchestrator();
    let id = created(&orch, &["a"]).await.remove(0);
    transport.once(
        HttpMethod::Post,
        "/vms/a/start",
        Reply::Echo.after(Duration::from_millis(500)),
    );

    let cancelled = tokio::time::timeout(Duration::from_millis(20), orch.start(&id)).await;
    assert!(cancelled.is_err());
    assert_eq!(orch.find(&id).expect("find").status(), DeviceStatus::Created);

    let record = orch.start(&id).await.expect("token released");
    assert_eq!(record.status(), DeviceStatus::Started);
    assert_eq!(transport.count_matching(HttpMethod::Post, "/start"), 2);
}

#[tokio::test]
async fn close_project_destroys_everything() {
    let (orch, transport) = orchestrator();
    let ids = created(&orch, &["a", "b"]).await;
    orch.start(&ids[0]).await.expect("start");

    let report = orch.close_project().await;
    assert!(report.is_success());
    assert!(orch.devices().is_empty());
    assert_eq!(transport.count_matching(HttpMethod::Delete, "/vms/"), 2);
    for id in &ids {
        assert_eq!(orch.registry().status_of(id), Some(DeviceStatus::Destroyed));
    }
}

#[tokio::test]
async fn external_representation_and_console_host() {
    let (orch, _transport) = orchestrator();
    created(&orch, &["a", "b"]).await;
    let id = DeviceId::new("a");

    let device = orch.device_json(&id).expect("json");
    assert_eq!(device["vm_id"], "a");
    assert_eq!(device["vm_type"], "vpcs");
    assert_eq!(device["compute_id"], "local");
    assert_eq!(device["project_id"], "lab");
    assert_eq!(device["status"], "created");
    assert!(device["properties"].is_object());

    let project = orch.project_json().expect("project json");
    let names: Vec<&str> = project
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|device| device["name"].as_str())
        .collect();
    assert_eq!(names, vec!["PC-a", "PC-b"]);

    assert_eq!(orch.console_host(&id).expect("host"), "10.0.0.5");
}

#[test]
fn lookups_report_the_lookup_operation() {
    let (orch, _transport) = orchestrator();
    let missing = DeviceId::new("missing");
    assert_eq!(
        orch.device_json(&missing).expect_err("missing"),
        LifecycleError::NotFound(missing.clone())
    );
    assert!(orch.device_view(&missing).is_err());

    orch.adopt(DeviceConfig::new("PC-g", "vpcs", "ghost").with_id("g"))
        .expect("adopt");
    let err = orch.console_host(&DeviceId::new("g")).expect_err("unknown compute");
    assert_eq!(
        err,
        LifecycleError::Placement {
            device: DeviceId::new("g"),
            operation: Operation::Lookup,
            compute: "ghost".to_owned(),
            reason: PlacementReason::UnknownCompute,
        }
    );
    assert!(err.is_local());
    assert!(err.to_string().contains("lookup"));
}

#[tokio::test]
async fn adopted_devices_can_be_destroyed_remotely() {
    let (orch, transport) = orchestrator();
    let record = orch.adopt(vpcs("x")).expect("adopt");
    assert_eq!(record.status(), DeviceStatus::Created);
    assert_eq!(transport.call_count(), 0);
    orch.destroy(record.id()).await.expect("destroy");
    assert_eq!(transport.count_matching(HttpMethod::Delete, "/vms/x"), 1);
}
