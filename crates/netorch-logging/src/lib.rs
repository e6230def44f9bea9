//! ---
//! netorch_section: "03-logging"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Structured logging adapters and sinks."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers stamping project, device, compute and operation fields.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Project identifier associated with the log event.
    pub project: Option<&'a str>,
    /// Device identifier associated with the log event.
    pub device: Option<&'a str>,
    /// Compute identifier the device is placed on.
    pub compute: Option<&'a str>,
    /// Lifecycle operation being performed.
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a project identifier.
    pub fn with_project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    /// Attach a device identifier.
    pub fn with_device(mut self, device: &'a str) -> Self {
        self.device = Some(device);
        self
    }

    /// Attach a compute identifier.
    pub fn with_compute(mut self, compute: &'a str) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Attach the operation name.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The remote confirmed the operation.
    Success,
    /// The operation was rejected locally before any remote call.
    Rejected,
    /// The remote call failed.
    Fault,
}

impl LifecycleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Rejected => "rejected",
            LifecycleOutcome::Fault => "fault",
        }
    }

    fn level(&self) -> Level {
        match self {
            LifecycleOutcome::Success => Level::INFO,
            LifecycleOutcome::Rejected => Level::WARN,
            LifecycleOutcome::Fault => Level::ERROR,
        }
    }
}

/// Emit a standardized lifecycle event with its outcome.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let project = ctx.project.unwrap_or("");
    let device = ctx.device.unwrap_or("");
    let compute = ctx.compute.unwrap_or("");
    let operation = ctx.operation.unwrap_or("");
    let outcome_str = outcome.as_str();
    // `tracing::event!` needs a constant level, so dispatch per level.
    match outcome.level() {
        Level::ERROR => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome_str,
            project,
            device,
            compute,
            operation,
            message = %message
        ),
        Level::WARN => tracing::event!(
            Level::WARN,
            event,
            outcome = outcome_str,
            project,
            device,
            compute,
            operation,
            message = %message
        ),
        _ => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome_str,
            project,
            device,
            compute,
            operation,
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_project("lab")
            .with_device("r1")
            .with_compute("local");
        net_info!(context = ctx.clone(), "device online");
        net_debug!("debug message");
        net_warn!(context = ctx.clone(), "slow compute: {}ms", 1200);
        net_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn lifecycle_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_project("lab").with_operation("start");
        log_lifecycle_event(
            Some(&ctx),
            "device.start",
            "device started",
            LifecycleOutcome::Success,
        );
        log_lifecycle_event(None, "device.stop", "rejected", LifecycleOutcome::Rejected);
        log_lifecycle_event(None, "device.stop", "remote fault", LifecycleOutcome::Fault);
    }

    #[test]
    fn outcome_levels_follow_severity() {
        assert_eq!(LifecycleOutcome::Success.level(), Level::INFO);
        assert_eq!(LifecycleOutcome::Rejected.level(), Level::WARN);
        assert_eq!(LifecycleOutcome::Fault.level(), Level::ERROR);
    }
}
