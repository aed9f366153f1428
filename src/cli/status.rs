use anyhow::Result;

use super::ConfigSource;
use crate::sandbox::{SandboxConfig, detect_capabilities};

pub async fn run(source: &ConfigSource) -> Result<()> {
    let caps = detect_capabilities();
    let config = source.load()?;

    println!("Sandbox Capabilities:");
    for line in caps.status_lines() {
        println!("{}", line);
    }
    println!();

    println!("Configuration:");
    match &source.path {
        Some(path) if path.exists() => println!("  File:        {}", path.display()),
        Some(path) => println!("  File:        {} (not found, defaults)", path.display()),
        None => println!("  File:        none (defaults)"),
    }
    for line in config_lines(&config) {
        println!("{}", line);
    }

    if !caps.host_ready() {
        println!();
        println!("No usable sandbox backend on this host; `exec` will fail.");
    }

    Ok(())
}

fn config_lines(config: &SandboxConfig) -> Vec<String> {
    let mut lines = vec![
        format!("  Workdir:     {}", config.workdir),
        format!("  Write:       {}", list(&config.allow_write)),
        format!("  Deny read:   {}", list(&config.deny_read)),
        format!("  Clean env:   {}", config.clean_env),
    ];

    if !config.env_allowlist.is_empty() {
        lines.push(format!("  Env allow:   {}", list(&config.env_allowlist)));
    }
    if !config.env_denylist.is_empty() {
        lines.push(format!("  Env deny:    {}", list(&config.env_denylist)));
    }

    lines
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
