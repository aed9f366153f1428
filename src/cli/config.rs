use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::ConfigSource;
use crate::config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (defaults merged with the policy file)
    Show {
        /// Output format: json (default) or toml
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Show policy file path
    Path,

    /// Write a starter policy file
    Init {
        /// Overwrite existing policy file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs, source: &ConfigSource) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(source, &format),
        ConfigCommands::Path => show_path(source),
        ConfigCommands::Init { force } => init_config(source, force),
    }
}

fn show_config(source: &ConfigSource, format: &str) -> Result<()> {
    let config = source.load()?;

    match format {
        "toml" => {
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        other => anyhow::bail!("Unknown format '{}' (expected json or toml)", other),
    }

    Ok(())
}

fn show_path(source: &ConfigSource) -> Result<()> {
    match &source.path {
        Some(path) => println!("{}", path.display()),
        None => println!("(policy file disabled by --no-config)"),
    }
    Ok(())
}

fn init_config(source: &ConfigSource, force: bool) -> Result<()> {
    let path = source
        .path
        .as_deref()
        .context("No policy file path: --no-config was given")?;

    config::init_config_file(path, force)?;
    println!("Created policy file at {}", path.display());
    Ok(())
}
