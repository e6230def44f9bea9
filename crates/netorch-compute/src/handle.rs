//! ---
//! netorch_section: "02-compute-backends"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Compute node handles and REST transports."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use netorch_common::config::{AppConfig, ComputeConfig, ComputeProtocol};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tracing::{debug, info, warn};

use crate::http::HttpTransport;
use crate::routes;
use crate::transport::{ComputeResponse, ComputeTransport, HttpMethod, Result};

/// Last-observed reachability of a compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Reachability {
    /// No health check has completed yet.
    #[default]
    Unknown,
    /// The last health check succeeded.
    Reachable,
    /// The last health check failed at the transport level.
    Unreachable,
}

/// Network location of a compute's REST API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeAddress {
    /// URL scheme.
    pub protocol: ComputeProtocol,
    /// Host name or IP, also used for console connections and link tunnels.
    pub host: String,
    /// TCP port of the REST API.
    pub port: u16,
}

impl fmt::Display for ComputeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// HTTP basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Optional password.
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Reference to a remote execution backend. Shared by every device placed on it.
pub struct ComputeHandle {
    id: String,
    address: ComputeAddress,
    credentials: Option<Credentials>,
    reachability: RwLock<Reachability>,
    transport: Arc<dyn ComputeTransport>,
}

impl fmt::Debug for ComputeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeHandle")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("credentials", &self.credentials)
            .field("reachability", &*self.reachability.read())
            .field("transport", &self.transport.name())
            .finish()
    }
}

impl ComputeHandle {
    /// Construct a handle around an arbitrary transport.
    pub fn new(
        id: impl Into<String>,
        address: ComputeAddress,
        credentials: Option<Credentials>,
        transport: Arc<dyn ComputeTransport>,
    ) -> Self {
        Self {
            id: id.into(),
            address,
            credentials,
            reachability: RwLock::new(Reachability::Unknown),
            transport,
        }
    }

    /// Build a handle backed by the reqwest transport.
    pub fn from_config(id: &str, config: &ComputeConfig, timeout: Duration) -> Result<Self> {
        let credentials = config.user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: config.password.clone(),
        });
        let transport = HttpTransport::new(config, credentials.clone(), timeout)?;
        let address = ComputeAddress {
            protocol: config.protocol,
            host: config.host.clone(),
            port: config.port,
        };
        Ok(Self::new(id, address, credentials, Arc::new(transport)))
    }

    /// Compute identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host used for console connections and link tunnels.
    pub fn host(&self) -> &str {
        &self.address.host
    }

    /// Full network address.
    pub fn address(&self) -> &ComputeAddress {
        &self.address
    }

    /// Configured credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Last-observed reachability.
    pub fn reachability(&self) -> Reachability {
        *self.reachability.read()
    }

    /// Record the outcome of an external health check.
    pub fn set_reachability(&self, reachability: Reachability) {
        let previous = std::mem::replace(&mut *self.reachability.write(), reachability);
        if previous != reachability {
            info!(compute = %self.id, from = %previous, to = %reachability, "compute reachability changed");
        }
    }

    /// Check `GET /version` and update reachability. Only transport failures mark the
    /// compute unreachable; any HTTP answer proves it is up.
    pub async fn check_health(&self) -> Reachability {
        let observed = match self.get(routes::VERSION).await {
            Ok(response) => {
                debug!(compute = %self.id, version = ?response.json().get("version"), "health check succeeded");
                Reachability::Reachable
            }
            Err(err) if err.is_retryable() => {
                warn!(compute = %self.id, error = %err, "health check failed");
                Reachability::Unreachable
            }
            Err(err) => {
                debug!(compute = %self.id, error = %err, "health check answered with an error");
                Reachability::Reachable
            }
        };
        self.set_reachability(observed);
        observed
    }

    /// `GET` a path on this compute.
    pub async fn get(&self, path: &str) -> Result<ComputeResponse> {
        self.request(HttpMethod::Get, path, None).await
    }

    /// `POST` to a path on this compute.
    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<ComputeResponse> {
        self.request(HttpMethod::Post, path, body).await
    }

    /// `PUT` to a path on this compute.
    pub async fn put(&self, path: &str, body: Option<Value>) -> Result<ComputeResponse> {
        self.request(HttpMethod::Put, path, body).await
    }

    /// `DELETE` a path on this compute.
    pub async fn delete(&self, path: &str) -> Result<ComputeResponse> {
        self.request(HttpMethod::Delete, path, None).await
    }

    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<ComputeResponse> {
        debug!(compute = %self.id, %method, path, transport = self.transport.name(), "compute request");
        let result = self.transport.request(method, path, body).await;
        if let Err(err) = &result {
            debug!(compute = %self.id, %method, path, error = %err, "compute request failed");
        }
        result
    }
}

/// All computes known to the controller, keyed by identifier in declaration order.
#[derive(Debug, Default, Clone)]
pub struct ComputeDirectory {
    computes: IndexMap<String, Arc<ComputeHandle>>,
}

impl ComputeDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build reqwest-backed handles for every configured compute.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut directory = Self::new();
        for (id, compute) in &config.computes {
            let handle =
                ComputeHandle::from_config(id, compute, config.orchestrator.request_timeout)?;
            directory.insert(handle);
        }
        Ok(directory)
    }

    /// Add or replace a compute.
    pub fn insert(&mut self, handle: ComputeHandle) -> Arc<ComputeHandle> {
        let handle = Arc::new(handle);
        self.computes
            .insert(handle.id().to_owned(), Arc::clone(&handle));
        handle
    }

    /// Look up a compute by identifier.
    pub fn get(&self, compute_id: &str) -> Option<Arc<ComputeHandle>> {
        self.computes.get(compute_id).cloned()
    }

    /// Iterate over computes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ComputeHandle>> {
        self.computes.values()
    }

    /// Number of computes.
    pub fn len(&self) -> usize {
        self.computes.len()
    }

    /// True when no compute is registered.
    pub fn is_empty(&self) -> bool {
        self.computes.is_empty()
    }

    /// Check every compute concurrently and return their reachability in order.
    pub async fn check_all(&self) -> Vec<(String, Reachability)> {
        let checks = self.computes.values().map(|handle| async move {
            let reachability = handle.check_health().await;
            (handle.id().to_owned(), reachability)
        });
        join_all(checks).await
    }
}
