pub mod config;
pub mod exec;
pub mod status;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::sandbox::SandboxConfig;

/// Exit code for sandbox setup or execution failures, as docker uses.
pub const EXIT_SANDBOX_ERROR: u8 = 125;

#[derive(Parser)]
#[command(name = "agentsandbox")]
#[command(author, version, about = "Filesystem sandbox for AI agent shell commands")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Policy file path (default: ~/.agent/sandbox/config.json)
    #[arg(short, long, global = true, env = "AGENTSANDBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip loading the policy file, use built-in defaults only
    #[arg(long, global = true)]
    pub no_config: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command in the sandbox
    Exec(exec::ExecArgs),

    /// Policy file management
    Config(config::ConfigArgs),

    /// Show sandbox backend availability and the effective policy
    Status,
}

/// Where the policy file comes from for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: Option<PathBuf>,
}

impl ConfigSource {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Self::resolve(cli.config.clone(), cli.no_config)
    }

    pub fn resolve(explicit: Option<PathBuf>, no_config: bool) -> Result<Self> {
        let path = if no_config {
            None
        } else {
            match explicit {
                Some(path) => Some(path),
                None => Some(crate::config::default_config_path()?),
            }
        };
        Ok(Self { path })
    }

    /// Defaults for the current directory merged with the policy file.
    pub fn load(&self) -> Result<SandboxConfig> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Ok(crate::config::default_config_with_path(
            self.path.as_deref(),
            &cwd,
        ))
    }
}
