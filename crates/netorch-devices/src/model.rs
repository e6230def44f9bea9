//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Opaque device identity, a UUID v4 unless the caller supplies one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUID v4 identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of the project owning a set of devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Wrap an existing project identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Controller-side view of a device's lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    /// Registered locally, not yet confirmed by the compute.
    Pending,
    /// Exists on the compute, never started.
    Created,
    /// Running.
    Started,
    /// Halted.
    Stopped,
    /// Paused in memory.
    Suspended,
    /// Removed; terminal.
    Destroyed,
}

impl DeviceStatus {
    /// Status reported by a compute response, when recognised.
    ///
    /// `pending` and `destroyed` are controller-only states and never accepted from
    /// the remote side.
    pub fn from_remote(value: &Value) -> Option<Self> {
        let status = value.as_str()?.parse::<DeviceStatus>().ok()?;
        match status {
            DeviceStatus::Pending | DeviceStatus::Destroyed => None,
            other => Some(other),
        }
    }

    /// Whether `update` may be issued in this status.
    pub fn accepts_update(self) -> bool {
        matches!(
            self,
            DeviceStatus::Created
                | DeviceStatus::Started
                | DeviceStatus::Stopped
                | DeviceStatus::Suspended
        )
    }

    /// Whether the device exists on its compute and may take part in a link.
    pub fn is_link_eligible(self) -> bool {
        self.accepts_update()
    }
}

/// Console protocol exposed by a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsoleType {
    /// Telnet console.
    Telnet,
    /// VNC graphical console.
    Vnc,
    /// Serial console.
    Serial,
    /// No console.
    None,
}

/// Payload-less power actions forwarded to `/vms/{id}/{action}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceAction {
    /// Power on.
    Start,
    /// Power off.
    Stop,
    /// Pause in memory.
    Suspend,
    /// Restart a running device.
    Reload,
}

impl DeviceAction {
    /// Trailing path segment of the action endpoint.
    pub fn path_segment(self) -> &'static str {
        match self {
            DeviceAction::Start => "start",
            DeviceAction::Stop => "stop",
            DeviceAction::Suspend => "suspend",
            DeviceAction::Reload => "reload",
        }
    }

    /// Whether the action is legal from `status`.
    pub fn permits(self, status: DeviceStatus) -> bool {
        use DeviceStatus::*;
        match self {
            DeviceAction::Start => matches!(status, Created | Stopped | Suspended),
            DeviceAction::Stop => matches!(status, Started | Suspended),
            DeviceAction::Suspend => matches!(status, Started),
            DeviceAction::Reload => matches!(status, Started),
        }
    }

    /// Status assumed after success when the compute does not report one.
    pub fn target(self) -> DeviceStatus {
        match self {
            DeviceAction::Start | DeviceAction::Reload => DeviceStatus::Started,
            DeviceAction::Stop => DeviceStatus::Stopped,
            DeviceAction::Suspend => DeviceStatus::Suspended,
        }
    }
}
