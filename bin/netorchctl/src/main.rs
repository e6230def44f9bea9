//! ---
//! netorch_section: "07-control-cli"
//! netorch_subsection: "binary"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Control CLI for probing computes and deploying topologies."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use netorch_common::config::{AppConfig, LoadedAppConfig};
use netorch_common::logging::init_tracing;
use tracing::info;

mod commands;
mod topology;

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["netorch.toml", "/etc/netorch/netorch.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "netorch device placement and lifecycle control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        env = "NETORCH_CONFIG",
        help = "Path to configuration file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "ID",
        env = "NETORCH_PROJECT",
        help = "Project identifier; defaults to the topology file's project"
    )]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Check every configured compute and print its reachability")]
    Health(commands::HealthArgs),
    #[command(about = "Create the devices and links of a topology file")]
    Deploy(commands::DeployArgs),
    #[command(about = "Destroy every device listed in a topology file")]
    Teardown(commands::TeardownArgs),
}

fn load_config(explicit: Option<PathBuf>) -> Result<LoadedAppConfig> {
    match explicit {
        Some(path) => Ok(LoadedAppConfig {
            config: AppConfig::from_path(&path)?,
            source: path,
        }),
        None => AppConfig::load_with_source(DEFAULT_CONFIG_CANDIDATES),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let LoadedAppConfig { config, source } = load_config(cli.config)?;
    init_tracing("netorchctl", &config.logging)?;
    info!(config_path = %source.display(), computes = config.computes.len(), "configuration loaded");

    match cli.command {
        Commands::Health(args) => args.execute(&config).await,
        Commands::Deploy(args) => args.execute(&config, cli.project.as_deref()).await,
        Commands::Teardown(args) => args.execute(&config, cli.project.as_deref()).await,
    }
}
