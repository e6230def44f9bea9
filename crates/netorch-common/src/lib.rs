//! ---
//! netorch_section: "01-shared-runtime"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Shared primitives and utilities for the orchestrator runtime."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! Shared primitives for the netorch workspace.
//! This crate exposes configuration loading and tracing bootstrap
//! utilities consumed by the orchestrator crates and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BusyPolicy, ComputeConfig, ComputeProtocol, LinksConfig, LoadedAppConfig,
    LoggingConfig, OrchestratorConfig,
};
pub use logging::{init_tracing, LogFormat};
