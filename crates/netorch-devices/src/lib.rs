//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Controller-side device state.
//!
//! A [`DeviceRecord`] captures what the controller knows about one virtual device;
//! the [`DeviceRegistry`] owns every record of a project and hands out the
//! per-device operation token that serializes remote calls.

pub mod error;
pub mod model;
pub mod properties;
pub mod record;
pub mod registry;

pub use error::{DeviceError, Result};
pub use model::{ConsoleType, DeviceAction, DeviceId, DeviceStatus, ProjectId};
pub use properties::PropertyMap;
pub use record::{DeviceConfig, DeviceRecord, DeviceUpdate, DeviceView};
pub use registry::{DeviceRegistry, OperationToken};
