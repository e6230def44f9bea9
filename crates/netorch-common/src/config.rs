//! ---
//! netorch_section: "01-shared-runtime"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Shared primitives and utilities for the orchestrator runtime."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use strum::{Display, EnumString};
use tracing::debug;

use crate::logging::LogFormat;

fn default_compute_port() -> u16 {
    3080
}

fn default_api_prefix() -> String {
    "/v2/compute".to_owned()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_udp_port_start() -> u16 {
    10000
}

fn default_udp_port_end() -> u16 {
    20000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the netorch controller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub computes: IndexMap<String, ComputeConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "NETORCH_CONFIG";

    /// Load configuration from disk, respecting the `NETORCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Retrieve a compute configuration by identifier.
    pub fn compute(&self, compute_id: &str) -> Option<&ComputeConfig> {
        self.computes.get(compute_id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.computes.is_empty() {
            return Err(anyhow!("configuration must declare at least one compute"));
        }
        for (compute_id, compute) in &self.computes {
            compute.validate(compute_id)?;
        }
        self.orchestrator.validate()?;
        self.links.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Scheme used to reach a compute node's REST API.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComputeProtocol {
    #[default]
    Http,
    Https,
}

/// Connection settings for one compute node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeConfig {
    #[serde(default)]
    pub protocol: ComputeProtocol,
    pub host: String,
    #[serde(default = "default_compute_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl ComputeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: ComputeProtocol::Http,
            host: host.into(),
            port,
            user: None,
            password: None,
            api_prefix: default_api_prefix(),
        }
    }

    pub fn validate(&self, compute_id: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("compute '{}' must declare a host", compute_id));
        }
        if self.password.is_some() && self.user.is_none() {
            return Err(anyhow!(
                "compute '{}' declares a password without a user",
                compute_id
            ));
        }
        Ok(())
    }
}

/// What to do when an operation targets a device that is already mid-transition.
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail the second operation immediately.
    #[default]
    Reject,
    /// Wait for the running operation and then re-validate.
    Queue,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            busy_policy: BusyPolicy::default(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("orchestrator.max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// UDP port range handed out to link tunnels on every compute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksConfig {
    #[serde(default = "default_udp_port_start")]
    pub udp_port_start: u16,
    #[serde(default = "default_udp_port_end")]
    pub udp_port_end: u16,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            udp_port_start: default_udp_port_start(),
            udp_port_end: default_udp_port_end(),
        }
    }
}

impl LinksConfig {
    pub fn validate(&self) -> Result<()> {
        if self.udp_port_start > self.udp_port_end {
            return Err(anyhow!(
                "links udp port range {}..={} is empty",
                self.udp_port_start,
                self.udp_port_end
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
