//! Policy file loading and default merging.
//!
//! The effective [`SandboxConfig`] is built from hardcoded defaults, then
//! overridden by the policy file (`~/.agent/sandbox/config.json` unless told
//! otherwise), then by command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;
use crate::sandbox::SandboxConfig;

/// Paths hidden from sandboxed commands unless the policy file says otherwise.
pub const DEFAULT_DENY_READ: &[&str] = &[
    "~/.ssh",
    "~/.aws",
    "~/.gnupg",
    "~/.kube",
    "~/.docker",
    "~/.config/gh",
];

/// On-disk policy file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_write: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny_read: Vec<String>,

    /// Tri-state: absent keeps the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_env: Option<bool>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_allowlist: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env_denylist: Vec<String>,
}

/// Default policy file location: `<config dir>/config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(Paths::resolve()?.config_file())
}

/// Built-in configuration for running in `cwd`.
pub fn hardcoded_defaults(cwd: &Path) -> SandboxConfig {
    let cwd = cwd.to_string_lossy().into_owned();
    SandboxConfig {
        workdir: cwd.clone(),
        allow_write: vec![cwd, "/tmp".to_string()],
        deny_read: DEFAULT_DENY_READ.iter().map(|s| s.to_string()).collect(),
        clean_env: false,
        env_allowlist: Vec::new(),
        env_denylist: Vec::new(),
        dry_run: false,
    }
}

/// Load a policy file.
///
/// Returns `Ok(None)` if the file does not exist. Files ending in `.toml` are
/// parsed as TOML, everything else as JSON.
pub fn load_file(path: &Path) -> Result<Option<FileConfig>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let config = if is_toml(path) {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    };

    Ok(Some(config))
}

/// Overlay a policy file onto `base`.
///
/// Non-empty lists replace the base lists; empty or omitted ones keep them.
/// An explicit `cleanEnv` replaces the base value.
pub fn merge(mut base: SandboxConfig, file: Option<FileConfig>) -> SandboxConfig {
    let Some(file) = file else {
        return base;
    };

    if !file.allow_write.is_empty() {
        base.allow_write = file.allow_write;
    }
    if !file.deny_read.is_empty() {
        base.deny_read = file.deny_read;
    }
    if let Some(clean_env) = file.clean_env {
        base.clean_env = clean_env;
    }
    if !file.env_allowlist.is_empty() {
        base.env_allowlist = file.env_allowlist;
    }
    if !file.env_denylist.is_empty() {
        base.env_denylist = file.env_denylist;
    }

    base
}

/// Hardcoded defaults merged with the policy file at `path`, if any.
///
/// A file that fails to load is logged and ignored.
pub fn default_config_with_path(path: Option<&Path>, cwd: &Path) -> SandboxConfig {
    let base = hardcoded_defaults(cwd);

    let Some(path) = path else {
        return base;
    };

    match load_file(path) {
        Ok(file) => {
            if file.is_some() {
                tracing::debug!(path = %path.display(), "loaded policy file");
            }
            merge(base, file)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load policy file, using defaults");
            base
        }
    }
}

/// Write a starter policy file to `path`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn init_config_file(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = if is_toml(path) {
        DEFAULT_TOML_TEMPLATE.to_string()
    } else {
        let mut json = serde_json::to_string_pretty(&starter_file_config())?;
        json.push('\n');
        json
    };

    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn starter_file_config() -> FileConfig {
    FileConfig {
        allow_write: vec![".".to_string(), "/tmp".to_string()],
        deny_read: DEFAULT_DENY_READ.iter().map(|s| s.to_string()).collect(),
        clean_env: Some(false),
        env_allowlist: Vec::new(),
        env_denylist: vec!["AWS_SECRET_ACCESS_KEY".to_string()],
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

/// Starter template for TOML policy files.
const DEFAULT_TOML_TEMPLATE: &str = r#"# agentsandbox policy
# Empty or omitted lists keep the built-in defaults.

# Writable paths. "*" allows writes everywhere.
allowWrite = [".", "/tmp"]

# Hidden paths. Deny-read always wins over allowWrite.
denyRead = ["~/.ssh", "~/.aws", "~/.gnupg", "~/.kube", "~/.docker", "~/.config/gh"]

# Start from an empty environment (plus envAllowlist and PATH, HOME, USER, TERM).
cleanEnv = false

# envAllowlist = ["NODE_ENV"]
envDenylist = ["AWS_SECRET_ACCESS_KEY"]
"#;
