//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::model::{ConsoleType, DeviceId, DeviceStatus, ProjectId};
use crate::properties::PropertyMap;

/// Response keys echoing identity; never written back.
const IDENTITY_ECHOES: &[&str] = &["vm_id", "project_id"];
/// Response keys describing compute-local details; never written back.
const COMPUTE_LOCAL: &[&str] = &["vm_directory", "command_line"];

/// Placement request for a new device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Identity to use; a UUID v4 is generated when absent.
    #[serde(default)]
    pub id: Option<DeviceId>,
    /// Display name.
    pub name: String,
    /// Emulator kind, e.g. `iou`, `qemu`, `vpcs`.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Identifier of the compute the device is placed on.
    pub compute: String,
    /// Console TCP port, when pinned.
    #[serde(default)]
    pub console: Option<u16>,
    /// Console protocol.
    #[serde(default)]
    pub console_type: Option<ConsoleType>,
    /// Emulator properties; absent values are dropped.
    #[serde(default)]
    pub properties: IndexMap<String, Option<Value>>,
}

impl DeviceConfig {
    /// Minimal configuration for `name` of kind `device_type` on `compute`.
    pub fn new(
        name: impl Into<String>,
        device_type: impl Into<String>,
        compute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
            compute: compute.into(),
            ..Self::default()
        }
    }

    /// Pin the identity.
    pub fn with_id(mut self, id: impl Into<DeviceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Pin the console port.
    pub fn with_console(mut self, port: u16) -> Self {
        self.console = Some(port);
        self
    }

    /// Set the console protocol.
    pub fn with_console_type(mut self, console_type: ConsoleType) -> Self {
        self.console_type = Some(console_type);
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), Some(value.into()));
        self
    }

    /// Declare a property as explicitly absent.
    pub fn without_property(mut self, key: impl Into<String>) -> Self {
        self.properties.insert(key.into(), None);
        self
    }
}

/// Partial update; only supplied attributes change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New console port.
    #[serde(default)]
    pub console: Option<u16>,
    /// New console protocol.
    #[serde(default)]
    pub console_type: Option<ConsoleType>,
    /// Properties to merge. Empty means no change; `None` drops the key.
    #[serde(default)]
    pub properties: IndexMap<String, Option<Value>>,
}

impl DeviceUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename the device.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Move the console port.
    pub fn console(mut self, port: u16) -> Self {
        self.console = Some(port);
        self
    }

    /// Change the console protocol.
    pub fn console_type(mut self, console_type: ConsoleType) -> Self {
        self.console_type = Some(console_type);
        self
    }

    /// Set a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), Some(value.into()));
        self
    }

    /// Drop a property.
    pub fn clear_property(mut self, key: impl Into<String>) -> Self {
        self.properties.insert(key.into(), None);
        self
    }

    /// True when nothing would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.console.is_none()
            && self.console_type.is_none()
            && self.properties.is_empty()
    }
}

/// Controller-side state of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    id: DeviceId,
    project_id: ProjectId,
    compute_id: String,
    device_type: String,
    name: String,
    console: Option<u16>,
    console_type: Option<ConsoleType>,
    properties: PropertyMap,
    status: DeviceStatus,
}

impl DeviceRecord {
    /// Build a record from a placement request; a missing identity is generated.
    pub fn from_config(project_id: ProjectId, config: DeviceConfig, status: DeviceStatus) -> Self {
        let mut properties = PropertyMap::new();
        properties.merge_optional(&config.properties);
        Self {
            id: config.id.unwrap_or_else(DeviceId::generate),
            project_id,
            compute_id: config.compute,
            device_type: config.device_type,
            name: config.name,
            console: config.console,
            console_type: config.console_type,
            properties,
            status,
        }
    }

    /// Immutable identity.
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Owning project.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Compute the device is placed on.
    pub fn compute_id(&self) -> &str {
        &self.compute_id
    }

    /// Emulator kind.
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Console port, if known.
    pub fn console(&self) -> Option<u16> {
        self.console
    }

    /// Console protocol, if known.
    pub fn console_type(&self) -> Option<ConsoleType> {
        self.console_type
    }

    /// Emulator properties.
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Last confirmed status.
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// Overwrite the status.
    pub fn set_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }

    /// Creation payload: properties, then the dedicated fields and `vm_id`.
    /// Absent fields are omitted.
    pub fn payload(&self) -> Value {
        let mut body = self.properties.to_json_map();
        body.insert("name".into(), Value::from(self.name.clone()));
        if let Some(console) = self.console {
            body.insert("console".into(), Value::from(console));
        }
        if let Some(console_type) = self.console_type {
            body.insert("console_type".into(), Value::from(console_type.to_string()));
        }
        body.insert("vm_id".into(), Value::from(self.id.to_string()));
        Value::Object(body)
    }

    /// Update payload carrying only the supplied attributes. A cleared property is
    /// sent as `null` so the compute drops it too.
    pub fn update_payload(update: &DeviceUpdate) -> Value {
        let mut body = Map::new();
        for (key, value) in &update.properties {
            let value = value.clone().unwrap_or(Value::Null);
            body.insert(key.clone(), value);
        }
        if let Some(name) = &update.name {
            body.insert("name".into(), Value::from(name.clone()));
        }
        if let Some(console) = update.console {
            body.insert("console".into(), Value::from(console));
        }
        if let Some(console_type) = update.console_type {
            body.insert("console_type".into(), Value::from(console_type.to_string()));
        }
        Value::Object(body)
    }

    /// Apply a confirmed update locally.
    pub fn apply_update(&mut self, update: &DeviceUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(console) = update.console {
            self.console = Some(console);
        }
        if let Some(console_type) = update.console_type {
            self.console_type = Some(console_type);
        }
        self.properties.merge_optional(&update.properties);
    }

    /// Write back the fields of a compute response.
    pub fn apply_response(&mut self, body: &Map<String, Value>) {
        for (key, value) in body {
            match key.as_str() {
                "name" => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_owned();
                    }
                }
                "console" => {
                    self.console = value.as_u64().and_then(|port| u16::try_from(port).ok());
                }
                "console_type" => {
                    if let Some(console_type) = value.as_str().and_then(|raw| raw.parse().ok()) {
                        self.console_type = Some(console_type);
                    }
                }
                "status" => {
                    if let Some(status) = DeviceStatus::from_remote(value) {
                        self.status = status;
                    }
                }
                key if IDENTITY_ECHOES.contains(&key) || COMPUTE_LOCAL.contains(&key) => {
                    trace!(device = %self.id, key, "ignoring response field");
                }
                _ => self.properties.insert(key.clone(), value.clone()),
            }
        }
    }

    /// Stable external representation.
    pub fn view(&self) -> DeviceView {
        DeviceView {
            compute_id: self.compute_id.clone(),
            project_id: self.project_id.clone(),
            vm_id: self.id.clone(),
            vm_type: self.device_type.clone(),
            name: self.name.clone(),
            console: self.console,
            console_type: self.console_type,
            properties: self.properties.clone(),
            status: self.status,
        }
    }
}

/// Serializable device representation exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceView {
    /// Compute hosting the device.
    pub compute_id: String,
    /// Owning project.
    pub project_id: ProjectId,
    /// Device identity.
    pub vm_id: DeviceId,
    /// Emulator kind.
    pub vm_type: String,
    /// Display name.
    pub name: String,
    /// Console port.
    pub console: Option<u16>,
    /// Console protocol.
    pub console_type: Option<ConsoleType>,
    /// Emulator properties.
    pub properties: PropertyMap,
    /// Last confirmed status.
    pub status: DeviceStatus,
}
