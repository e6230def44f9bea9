//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use thiserror::Error;

use crate::model::DeviceId;

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Local failures raised by the device registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// No live record carries this identity.
    #[error("device {0} not found")]
    NotFound(DeviceId),
    /// A live record already carries this identity.
    #[error("device {0} already exists in the project")]
    DuplicateIdentity(DeviceId),
    /// Another operation currently holds the device token.
    #[error("device {0} is busy with another operation")]
    Busy(DeviceId),
}

impl DeviceError {
    /// Only a busy token clears up on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::Busy(_))
    }
}
