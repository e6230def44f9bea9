//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::fmt;

use netorch_devices::DeviceId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// One side of a link: a device port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEndpoint {
    pub device: DeviceId,
    #[serde(default)]
    pub adapter: u32,
    #[serde(default)]
    pub port: u32,
}

impl LinkEndpoint {
    pub fn new(device: impl Into<DeviceId>, adapter: u32, port: u32) -> Self {
        Self {
            device: device.into(),
            adapter,
            port,
        }
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.device, self.adapter, self.port)
    }
}

/// Requested link between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: LinkEndpoint,
    pub b: LinkEndpoint,
}

impl LinkSpec {
    pub fn new(a: LinkEndpoint, b: LinkEndpoint) -> Self {
        Self { a, b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Established side of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSide {
    pub endpoint: LinkEndpoint,
    /// Compute hosting the device.
    pub compute: String,
    /// Local UDP port of the tunnel on that compute.
    pub udp_port: u16,
}

/// A link confirmed on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub id: LinkId,
    pub a: LinkSide,
    pub b: LinkSide,
}

impl Link {
    pub fn sides(&self) -> [&LinkSide; 2] {
        [&self.a, &self.b]
    }

    /// Whether `device` is one of the endpoints.
    pub fn touches(&self, device: &DeviceId) -> bool {
        self.a.endpoint.device == *device || self.b.endpoint.device == *device
    }

    pub fn uses(&self, endpoint: &LinkEndpoint) -> bool {
        self.a.endpoint == *endpoint || self.b.endpoint == *endpoint
    }
}

/// UDP tunnel descriptor posted to one side's NIO endpoint.
pub fn udp_tunnel(local_port: u16, peer_host: &str, peer_port: u16) -> Value {
    json!({
        "type": "nio_udp",
        "lport": local_port,
        "rhost": peer_host,
        "rport": peer_port,
    })
}
