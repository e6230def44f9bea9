//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use netorch_compute::TransportError;
use netorch_devices::DeviceId;
use netorch_orchestrator::LifecycleError;
use thiserror::Error;

use crate::link::{LinkEndpoint, LinkId};

pub type Result<T> = std::result::Result<T, LinkError>;

/// Failures of link operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    /// Both endpoints name the same device.
    #[error("a link needs two distinct devices, got {0} on both ends")]
    SameDevice(DeviceId),
    /// The endpoint port already carries a link.
    #[error("port {0} is already linked")]
    PortInUse(LinkEndpoint),
    /// No UDP port left on the compute.
    #[error("no free UDP tunnel port on compute {0}")]
    PortsExhausted(String),
    #[error("link {0} not found")]
    UnknownLink(LinkId),
    /// Device lookup, status guard, busy token or placement failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// One side's compute failed and nothing was left behind.
    #[error("compute {compute} failed the link request for device {device}: {source}")]
    Endpoint {
        device: DeviceId,
        compute: String,
        #[source]
        source: TransportError,
    },
    /// The second side failed after the first was established.
    #[error(
        "link half-applied: {failed} failed ({source}) after {established} succeeded, compensated: {compensated}"
    )]
    PartialLinkFailure {
        /// Side that was established and then torn down again.
        established: DeviceId,
        /// Side whose request failed.
        failed: DeviceId,
        #[source]
        source: TransportError,
        /// Whether the compensating teardown succeeded.
        compensated: bool,
    },
}

impl LinkError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Lifecycle(err) => err.is_retryable(),
            LinkError::Endpoint { source, .. } => source.is_retryable(),
            // An orphaned half-link must be cleaned up before retrying.
            LinkError::PartialLinkFailure {
                source, compensated, ..
            } => *compensated && source.is_retryable(),
            _ => false,
        }
    }
}
