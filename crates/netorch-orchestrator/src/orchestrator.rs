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

use futures::stream::{self, StreamExt};
use netorch_common::config::{BusyPolicy, OrchestratorConfig};
use netorch_compute::{routes, ComputeDirectory, ComputeHandle, Reachability};
use netorch_devices::{
    DeviceAction, DeviceConfig, DeviceId, DeviceRecord, DeviceRegistry, DeviceStatus,
    DeviceUpdate, DeviceView, OperationToken, ProjectId,
};
use netorch_logging::{log_lifecycle_event, LifecycleOutcome, LogContext};
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::error::{LifecycleError, PlacementReason, Result};
use crate::operation::{BatchItem, BatchOperation, BatchReport, Operation};

/// Drives device lifecycles for one project across its computes.
#[derive(Debug)]
pub struct LifecycleOrchestrator {
    registry: DeviceRegistry,
    computes: ComputeDirectory,
    config: OrchestratorConfig,
}

/// Token held for one operation, and whether it had to be waited for.
struct Claim {
    token: OperationToken,
    waited: bool,
}

impl LifecycleOrchestrator {
    pub fn new(project_id: ProjectId, computes: ComputeDirectory, config: OrchestratorConfig) -> Self {
        Self {
            registry: DeviceRegistry::new(project_id),
            computes,
            config,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        self.registry.project_id()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn computes(&self) -> &ComputeDirectory {
        &self.computes
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot of a live device.
    pub fn find(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.registry
            .find(id)
            .map_err(|err| LifecycleError::from_registry(err, Operation::Lookup))
    }

    /// Every live device in registration order.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.list()
    }

    /// Place a new device on its compute.
    ///
    /// The device is registered as `pending` first; if the compute does not confirm,
    /// the registration is rolled back so the same identity can be retried.
    pub async fn create(&self, config: DeviceConfig) -> Result<DeviceRecord> {
        let (record, _token) = self
            .registry
            .register_claimed(config, DeviceStatus::Pending)
            .map_err(|err| LifecycleError::from_registry(err, Operation::Create))?;
        let span = self.span(&record, Operation::Create);
        let outcome = async {
            let compute = self.compute_for(&record, Operation::Create)?;
            let path = routes::device_collection(self.project_id().as_str(), record.device_type());
            let response = compute
                .post(&path, Some(record.payload()))
                .await
                .map_err(|err| self.remote_error(&record, Operation::Create, err))?;
            self.registry
                .modify(record.id(), |device| {
                    device.set_status(DeviceStatus::Created);
                    device.apply_response(response.json());
                })
                .map_err(|err| LifecycleError::from_registry(err, Operation::Create))
        }
        .instrument(span)
        .await;
        if outcome.is_err() {
            self.registry.discard(record.id());
        }
        self.observe(&record, Operation::Create, outcome)
    }

    /// Register a device that already exists on its compute, without a remote call.
    pub fn adopt(&self, config: DeviceConfig) -> Result<DeviceRecord> {
        self.registry
            .register_claimed(config, DeviceStatus::Created)
            .map(|(record, _token)| record)
            .map_err(|err| LifecycleError::from_registry(err, Operation::Create))
    }

    /// Change the supplied attributes. The record changes only once the compute
    /// confirms.
    pub async fn update(&self, id: &DeviceId, update: DeviceUpdate) -> Result<DeviceRecord> {
        let claim = self.claim(id, Operation::Update).await?;
        let record = self.current(id, Operation::Update)?;
        let span = self.span(&record, Operation::Update);
        let outcome = async {
            if !record.status().accepts_update() {
                return Err(self.invalid(&record, Operation::Update));
            }
            let compute = self.compute_for(&record, Operation::Update)?;
            let path = routes::device(
                self.project_id().as_str(),
                record.device_type(),
                record.id().as_str(),
            );
            let response = compute
                .put(&path, Some(DeviceRecord::update_payload(&update)))
                .await
                .map_err(|err| self.remote_error(&record, Operation::Update, err))?;
            self.registry
                .modify(id, |device| {
                    device.apply_update(&update);
                    device.apply_response(response.json());
                })
                .map_err(|err| LifecycleError::from_registry(err, Operation::Update))
        }
        .instrument(span)
        .await;
        drop(claim);
        self.observe(&record, Operation::Update, outcome)
    }

    pub async fn start(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.power(id, DeviceAction::Start).await
    }

    pub async fn stop(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.power(id, DeviceAction::Stop).await
    }

    pub async fn suspend(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.power(id, DeviceAction::Suspend).await
    }

    pub async fn reload(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.power(id, DeviceAction::Reload).await
    }

    async fn power(&self, id: &DeviceId, action: DeviceAction) -> Result<DeviceRecord> {
        let operation = Operation::from(action);
        let claim = self.claim(id, operation).await?;
        let record = self.current(id, operation)?;
        // A queued caller that finds the device already where it wanted it takes the
        // earlier outcome instead of repeating the call.
        if claim.waited && action != DeviceAction::Reload && record.status() == action.target() {
            debug!(device = %id, %operation, "queued operation already satisfied");
            return Ok(record);
        }
        let span = self.span(&record, operation);
        let outcome = async {
            if !action.permits(record.status()) {
                return Err(self.invalid(&record, operation));
            }
            let compute = self.compute_for(&record, operation)?;
            let path = routes::device_action(
                self.project_id().as_str(),
                record.device_type(),
                record.id().as_str(),
                action.path_segment(),
            );
            let response = compute
                .post(&path, None)
                .await
                .map_err(|err| self.remote_error(&record, operation, err))?;
            self.registry
                .modify(id, |device| {
                    device.set_status(action.target());
                    device.apply_response(response.json());
                })
                .map_err(|err| LifecycleError::from_registry(err, operation))
        }
        .instrument(span)
        .await;
        drop(claim);
        self.observe(&record, operation, outcome)
    }

    /// Remove a device from its compute and from the registry.
    ///
    /// Idempotent: an absent or already destroyed device, or a `404` from the
    /// compute, counts as success. A pending device is dropped without a remote call.
    pub async fn destroy(&self, id: &DeviceId) -> Result<()> {
        if matches!(self.registry.status_of(id), None | Some(DeviceStatus::Destroyed)) {
            debug!(device = %id, "destroy of absent device is a no-op");
            return Ok(());
        }
        let claim = self.claim(id, Operation::Destroy).await?;
        let record = match self.registry.find(id) {
            Ok(record) => record,
            // Destroyed while we were queued.
            Err(_) => return Ok(()),
        };
        if record.status() == DeviceStatus::Pending {
            self.registry.remove(id);
            return self.observe(&record, Operation::Destroy, Ok(()));
        }
        let span = self.span(&record, Operation::Destroy);
        let outcome = async {
            let compute = self.compute_for(&record, Operation::Destroy)?;
            let path = routes::device(
                self.project_id().as_str(),
                record.device_type(),
                record.id().as_str(),
            );
            match compute.delete(&path).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    debug!(device = %id, "compute no longer knows the device");
                }
                Err(err) => return Err(self.remote_error(&record, Operation::Destroy, err)),
            }
            self.registry.remove(id);
            Ok::<(), LifecycleError>(())
        }
        .instrument(span)
        .await;
        drop(claim);
        self.observe(&record, Operation::Destroy, outcome)
    }

    /// Run `operation` on every listed device with bounded fan-out. Results come back
    /// in input order and one failure never affects its siblings.
    pub async fn apply_all(&self, operation: BatchOperation, devices: &[DeviceId]) -> BatchReport {
        let limit = self.config.max_concurrency.max(1);
        let items = stream::iter(devices.iter().cloned())
            .map(|device| async move {
                let outcome = self.apply_one(operation, &device).await;
                BatchItem { device, outcome }
            })
            .buffered(limit)
            .collect::<Vec<_>>()
            .await;
        let report = BatchReport { operation, items };
        let failed = report.failures().count();
        debug!(
            project = %self.project_id(),
            %operation,
            total = report.items.len(),
            failed,
            "batch finished"
        );
        report
    }

    async fn apply_one(&self, operation: BatchOperation, device: &DeviceId) -> Result<DeviceStatus> {
        match operation.action() {
            Some(action) => self.power(device, action).await.map(|record| record.status()),
            None => self.destroy(device).await.map(|()| DeviceStatus::Destroyed),
        }
    }

    pub async fn start_all(&self) -> BatchReport {
        self.apply_all(BatchOperation::Start, &self.registry.ids()).await
    }

    pub async fn stop_all(&self) -> BatchReport {
        self.apply_all(BatchOperation::Stop, &self.registry.ids()).await
    }

    pub async fn suspend_all(&self) -> BatchReport {
        self.apply_all(BatchOperation::Suspend, &self.registry.ids()).await
    }

    pub async fn reload_all(&self) -> BatchReport {
        self.apply_all(BatchOperation::Reload, &self.registry.ids()).await
    }

    /// Tear the project down, destroying every device.
    pub async fn close_project(&self) -> BatchReport {
        let report = self
            .apply_all(BatchOperation::Destroy, &self.registry.ids())
            .await;
        let ctx = LogContext::new()
            .with_project(self.project_id().as_str())
            .with_operation("close");
        let outcome = if report.is_success() {
            LifecycleOutcome::Success
        } else {
            LifecycleOutcome::Fault
        };
        log_lifecycle_event(Some(&ctx), "project.close", "project closed", outcome);
        report
    }

    /// External representation of one device.
    pub fn device_view(&self, id: &DeviceId) -> Result<DeviceView> {
        self.find(id).map(|record| record.view())
    }

    pub fn device_json(&self, id: &DeviceId) -> Result<Value> {
        let record = self.find(id)?;
        encode(&record)
    }

    /// Every device's external representation, in registration order.
    pub fn project_json(&self) -> Result<Value> {
        self.registry
            .list()
            .iter()
            .map(encode)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    /// Host a console client should connect to for this device.
    pub fn console_host(&self, id: &DeviceId) -> Result<String> {
        let record = self.find(id)?;
        let compute = self
            .computes
            .get(record.compute_id())
            .ok_or_else(|| placement(&record, Operation::Lookup, PlacementReason::UnknownCompute))?;
        Ok(compute.host().to_owned())
    }

    /// Take the device token for `operation`, honouring the busy policy.
    ///
    /// Destroyed or unknown devices fail before any waiting.
    pub async fn lock_device(&self, id: &DeviceId, operation: Operation) -> Result<OperationToken> {
        self.claim(id, operation).await.map(|claim| claim.token)
    }

    async fn claim(&self, id: &DeviceId, operation: Operation) -> Result<Claim> {
        match self.registry.status_of(id) {
            None => return Err(LifecycleError::NotFound(id.clone())),
            Some(DeviceStatus::Destroyed) => {
                let err = LifecycleError::InvalidTransition {
                    device: id.clone(),
                    operation,
                    status: DeviceStatus::Destroyed,
                };
                self.reject(id, operation, &err);
                return Err(err);
            }
            Some(_) => {}
        }
        let busy = match self.registry.try_acquire(id) {
            Ok(token) => {
                return Ok(Claim {
                    token,
                    waited: false,
                })
            }
            Err(err) => LifecycleError::from_registry(err, operation),
        };
        if self.config.busy_policy == BusyPolicy::Reject
            || !matches!(busy, LifecycleError::ConcurrentOperation { .. })
        {
            self.reject(id, operation, &busy);
            return Err(busy);
        }
        debug!(device = %id, %operation, "device busy, queueing");
        let token = self
            .registry
            .acquire(id)
            .await
            .map_err(|err| LifecycleError::from_registry(err, operation))?;
        Ok(Claim {
            token,
            waited: true,
        })
    }

    /// Re-read the record once the token is held.
    fn current(&self, id: &DeviceId, operation: Operation) -> Result<DeviceRecord> {
        self.registry.find(id).map_err(|_| match self.registry.status_of(id) {
            Some(status) => LifecycleError::InvalidTransition {
                device: id.clone(),
                operation,
                status,
            },
            None => LifecycleError::NotFound(id.clone()),
        })
    }

    /// Compute hosting `record`, refusing unknown or unreachable ones.
    pub fn compute_for(&self, record: &DeviceRecord, operation: Operation) -> Result<Arc<ComputeHandle>> {
        let compute = self
            .computes
            .get(record.compute_id())
            .ok_or_else(|| placement(record, operation, PlacementReason::UnknownCompute))?;
        if compute.reachability() == Reachability::Unreachable {
            return Err(placement(record, operation, PlacementReason::Unreachable));
        }
        Ok(compute)
    }

    fn remote_error(
        &self,
        record: &DeviceRecord,
        operation: Operation,
        err: netorch_compute::TransportError,
    ) -> LifecycleError {
        LifecycleError::from_transport(
            err,
            record.id().clone(),
            operation,
            record.compute_id().to_owned(),
        )
    }

    fn invalid(&self, record: &DeviceRecord, operation: Operation) -> LifecycleError {
        LifecycleError::InvalidTransition {
            device: record.id().clone(),
            operation,
            status: record.status(),
        }
    }

    fn span(&self, record: &DeviceRecord, operation: Operation) -> tracing::Span {
        info_span!(
            "lifecycle",
            project = %self.project_id(),
            device = %record.id(),
            compute = record.compute_id(),
            %operation
        )
    }

    fn reject(&self, id: &DeviceId, operation: Operation, err: &LifecycleError) {
        let operation_name = operation.to_string();
        let ctx = LogContext::new()
            .with_project(self.project_id().as_str())
            .with_device(id.as_str())
            .with_operation(&operation_name);
        log_lifecycle_event(
            Some(&ctx),
            "device.lifecycle",
            &err.to_string(),
            LifecycleOutcome::Rejected,
        );
    }

    fn observe<T>(&self, record: &DeviceRecord, operation: Operation, outcome: Result<T>) -> Result<T> {
        let operation_name = operation.to_string();
        let ctx = LogContext::new()
            .with_project(self.project_id().as_str())
            .with_device(record.id().as_str())
            .with_compute(record.compute_id())
            .with_operation(&operation_name);
        match &outcome {
            Ok(_) => log_lifecycle_event(
                Some(&ctx),
                "device.lifecycle",
                "operation confirmed",
                LifecycleOutcome::Success,
            ),
            Err(err) => {
                let level = if err.is_local() {
                    LifecycleOutcome::Rejected
                } else {
                    LifecycleOutcome::Fault
                };
                log_lifecycle_event(Some(&ctx), "device.lifecycle", &err.to_string(), level);
            }
        }
        outcome
    }
}

fn placement(record: &DeviceRecord, operation: Operation, reason: PlacementReason) -> LifecycleError {
    LifecycleError::Placement {
        device: record.id().clone(),
        operation,
        compute: record.compute_id().to_owned(),
        reason,
    }
}

fn encode(record: &DeviceRecord) -> Result<Value> {
    serde_json::to_value(record.view()).map_err(|err| LifecycleError::Representation {
        device: record.id().clone(),
        reason: err.to_string(),
    })
}
