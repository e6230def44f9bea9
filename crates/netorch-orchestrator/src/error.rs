//! ---
//! netorch_section: "05-lifecycle-orchestration"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Lifecycle orchestration of devices across compute backends."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use netorch_compute::TransportError;
use netorch_devices::{DeviceError, DeviceId, DeviceStatus};
use strum::Display;
use thiserror::Error;

use crate::operation::Operation;

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Why a device could not be placed on, or reached through, its compute.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum PlacementReason {
    /// No compute with that identifier is configured.
    #[strum(serialize = "unknown compute")]
    UnknownCompute,
    /// The last health check marked the compute unreachable.
    #[strum(serialize = "compute marked unreachable")]
    Unreachable,
    /// The compute refused the connection.
    #[strum(serialize = "connection failed")]
    ConnectFailed,
}

/// Failures of lifecycle operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    /// Unknown device identity.
    #[error("device {0} not found")]
    NotFound(DeviceId),
    /// The identity is already live in the project.
    #[error("device {0} already exists in the project")]
    DuplicateIdentity(DeviceId),
    /// The status guard refused the operation.
    #[error("cannot {operation} device {device} while it is {status}")]
    InvalidTransition {
        device: DeviceId,
        operation: Operation,
        status: DeviceStatus,
    },
    /// The device's compute is unknown or unreachable.
    #[error("cannot {operation} device {device} on compute {compute}: {reason}")]
    Placement {
        device: DeviceId,
        operation: Operation,
        compute: String,
        reason: PlacementReason,
    },
    /// The compute rejected the request (4xx).
    #[error("compute {compute} rejected {operation} of device {device}: {source}")]
    Validation {
        device: DeviceId,
        operation: Operation,
        compute: String,
        #[source]
        source: TransportError,
    },
    /// Any other remote failure.
    #[error("{operation} of device {device} on compute {compute} failed: {source}")]
    RemoteFault {
        device: DeviceId,
        operation: Operation,
        compute: String,
        #[source]
        source: TransportError,
    },
    /// Another operation holds the device token.
    #[error("device {device} is busy, {operation} rejected")]
    ConcurrentOperation { device: DeviceId, operation: Operation },
    /// The external representation could not be encoded.
    #[error("cannot encode device {device}: {reason}")]
    Representation { device: DeviceId, reason: String },
}

impl LifecycleError {
    /// Whether a caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::RemoteFault { .. } | LifecycleError::ConcurrentOperation { .. } => {
                true
            }
            LifecycleError::Placement { reason, .. } => *reason != PlacementReason::UnknownCompute,
            _ => false,
        }
    }

    /// True for guard failures raised before any remote call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotFound(_)
                | LifecycleError::DuplicateIdentity(_)
                | LifecycleError::InvalidTransition { .. }
                | LifecycleError::ConcurrentOperation { .. }
                | LifecycleError::Representation { .. }
                | LifecycleError::Placement {
                    reason: PlacementReason::UnknownCompute | PlacementReason::Unreachable,
                    ..
                }
        )
    }

    /// Device the failure concerns.
    pub fn device(&self) -> &DeviceId {
        match self {
            LifecycleError::NotFound(device) | LifecycleError::DuplicateIdentity(device) => device,
            LifecycleError::InvalidTransition { device, .. }
            | LifecycleError::Placement { device, .. }
            | LifecycleError::Validation { device, .. }
            | LifecycleError::RemoteFault { device, .. }
            | LifecycleError::ConcurrentOperation { device, .. }
            | LifecycleError::Representation { device, .. } => device,
        }
    }

    pub(crate) fn from_registry(err: DeviceError, operation: Operation) -> Self {
        match err {
            DeviceError::NotFound(device) => LifecycleError::NotFound(device),
            DeviceError::DuplicateIdentity(device) => LifecycleError::DuplicateIdentity(device),
            DeviceError::Busy(device) => LifecycleError::ConcurrentOperation { device, operation },
        }
    }

    pub(crate) fn from_transport(
        err: TransportError,
        device: DeviceId,
        operation: Operation,
        compute: String,
    ) -> Self {
        match err {
            TransportError::Rejected { .. } => LifecycleError::Validation {
                device,
                operation,
                compute,
                source: err,
            },
            TransportError::Connect(_) if operation == Operation::Create => {
                LifecycleError::Placement {
                    device,
                    operation,
                    compute,
                    reason: PlacementReason::ConnectFailed,
                }
            }
            _ => LifecycleError::RemoteFault {
                device,
                operation,
                compute,
                source: err,
            },
        }
    }
}
