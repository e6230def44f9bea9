//! ---
//! netorch_section: "05-lifecycle-orchestration"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Lifecycle orchestration of devices across compute backends."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! Lifecycle orchestration kernel.
//!
//! [`LifecycleOrchestrator`] forwards every create/update/power/destroy request to the
//! device's compute, writes back what the compute confirms, and fans batch operations
//! out with a bounded concurrency limit. Operations on one device are serialized by
//! the registry's per-device token; the configured [`BusyPolicy`] decides whether a
//! second caller is rejected or queued.
//!
//! [`BusyPolicy`]: netorch_common::config::BusyPolicy

pub mod error;
pub mod operation;
pub mod orchestrator;

pub use error::{LifecycleError, PlacementReason, Result};
pub use operation::{BatchItem, BatchOperation, BatchReport, Operation};
pub use orchestrator::LifecycleOrchestrator;
