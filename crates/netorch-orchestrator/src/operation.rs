//! ---
//! netorch_section: "05-lifecycle-orchestration"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Lifecycle orchestration of devices across compute backends."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use netorch_devices::{DeviceAction, DeviceId, DeviceStatus};
use serde::Serialize;
use serde_json::{json, Value};
use strum::{Display, EnumString};

use crate::error::LifecycleError;

/// Every lifecycle operation, used for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Start,
    Stop,
    Suspend,
    Reload,
    Destroy,
    Link,
    Unlink,
    /// Read-only access to a record.
    Lookup,
}

impl From<DeviceAction> for Operation {
    fn from(action: DeviceAction) -> Self {
        match action {
            DeviceAction::Start => Operation::Start,
            DeviceAction::Stop => Operation::Stop,
            DeviceAction::Suspend => Operation::Suspend,
            DeviceAction::Reload => Operation::Reload,
        }
    }
}

/// Single-device operations that can be fanned out by `apply_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BatchOperation {
    Start,
    Stop,
    Suspend,
    Reload,
    Destroy,
}

impl BatchOperation {
    /// Power action behind the batch operation; `None` for destroy.
    pub fn action(self) -> Option<DeviceAction> {
        match self {
            BatchOperation::Start => Some(DeviceAction::Start),
            BatchOperation::Stop => Some(DeviceAction::Stop),
            BatchOperation::Suspend => Some(DeviceAction::Suspend),
            BatchOperation::Reload => Some(DeviceAction::Reload),
            BatchOperation::Destroy => None,
        }
    }
}

impl From<BatchOperation> for Operation {
    fn from(operation: BatchOperation) -> Self {
        match operation.action() {
            Some(action) => action.into(),
            None => Operation::Destroy,
        }
    }
}

/// Outcome of one device within a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub device: DeviceId,
    /// Status confirmed after the operation, or the captured error.
    pub outcome: Result<DeviceStatus, LifecycleError>,
}

/// Per-device outcomes of a batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    /// True when every device succeeded.
    pub fn is_success(&self) -> bool {
        self.items.iter().all(|item| item.outcome.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &DeviceId> {
        self.items
            .iter()
            .filter(|item| item.outcome.is_ok())
            .map(|item| &item.device)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&DeviceId, &LifecycleError)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().err().map(|err| (&item.device, err)))
    }

    /// Outcome for one device.
    pub fn outcome(&self, device: &DeviceId) -> Option<&Result<DeviceStatus, LifecycleError>> {
        self.items
            .iter()
            .find(|item| &item.device == device)
            .map(|item| &item.outcome)
    }

    /// JSON summary, one entry per device.
    pub fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| match &item.outcome {
                Ok(status) => json!({
                    "device": item.device,
                    "ok": true,
                    "status": status,
                }),
                Err(err) => json!({
                    "device": item.device,
                    "ok": false,
                    "error": err.to_string(),
                    "retryable": err.is_retryable(),
                }),
            })
            .collect();
        json!({
            "operation": self.operation.to_string(),
            "results": items,
        })
    }
}
