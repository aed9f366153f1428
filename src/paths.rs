//! Config directory resolution.
//!
//! The directory is resolved through a two-level fallback:
//! 1. `AGENTSANDBOX_CONFIG_DIR` (absolute paths only)
//! 2. `~/.agent/sandbox`

use anyhow::{Context, Result};
use std::path::PathBuf;

pub const CONFIG_DIR_ENV: &str = "AGENTSANDBOX_CONFIG_DIR";

/// Resolved directory paths for the application.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.json lives here
    pub config_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        let home = etcetera::home_dir().context("Failed to determine home directory")?;

        let config_dir = env_or(&env_fn, CONFIG_DIR_ENV, || {
            home.join(".agent").join("sandbox")
        });

        Ok(Self { config_dir })
    }

    /// Policy file: config_dir/config.json
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| PathBuf::from(shellexpand::tilde(&v).into_owned()))
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Helper: build an env_fn from a HashMap
    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_config_dir_is_under_home() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_dir.is_absolute());
        assert!(
            paths.config_dir.ends_with(".agent/sandbox"),
            "config_dir: {:?}",
            paths.config_dir
        );
    }

    #[test]
    fn env_var_overrides_default() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert(CONFIG_DIR_ENV, "/custom/config");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.config_file(), PathBuf::from("/custom/config/config.json"));
    }

    #[test]
    fn relative_and_empty_overrides_are_ignored() {
        for value in ["relative/path", ""] {
            let mut env: HashMap<&str, &str> = HashMap::new();
            env.insert(CONFIG_DIR_ENV, value);

            let paths = Paths::resolve_with_env(make_env(env)).unwrap();
            assert!(paths.config_dir.ends_with(".agent/sandbox"));
        }
    }
}
