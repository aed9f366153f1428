use std::collections::HashSet;
use std::ffi::{OsStr, OsString};

use super::policy::SandboxConfig;

/// Variables a clean environment always carries when the parent has them.
pub const ESSENTIAL_VARS: [&str; 4] = ["PATH", "HOME", "USER", "TERM"];

/// How the child environment is derived from the parent's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvMode {
    /// Start empty, copy the allowlist, then the essentials.
    Clean { allowlist: Vec<String> },
    /// Copy everything except the denylist.
    Denylist { denylist: Vec<String> },
}

impl EnvMode {
    pub fn from_config(config: &SandboxConfig) -> Self {
        if config.clean_env {
            EnvMode::Clean {
                allowlist: config.env_allowlist.clone(),
            }
        } else {
            EnvMode::Denylist {
                denylist: config.env_denylist.clone(),
            }
        }
    }
}

/// Build the ordered child environment from `current`.
///
/// No key appears twice in the result.
pub fn build_env<I, K, V>(mode: &EnvMode, current: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let current: Vec<(OsString, OsString)> = current
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    match mode {
        EnvMode::Clean { allowlist } => {
            let mut env: Vec<(OsString, OsString)> = Vec::new();
            let keys = allowlist
                .iter()
                .map(String::as_str)
                .chain(ESSENTIAL_VARS.iter().copied());

            for key in keys {
                if env.iter().any(|(k, _)| k == key) {
                    continue;
                }
                if let Some(value) = lookup(&current, key) {
                    env.push((key.into(), value.to_os_string()));
                }
            }
            env
        }
        EnvMode::Denylist { denylist } => {
            let deny: HashSet<&OsStr> = denylist.iter().map(OsStr::new).collect();
            current
                .into_iter()
                .filter(|(k, _)| !deny.contains(k.as_os_str()))
                .collect()
        }
    }
}

/// Render an environment as `KEY=VALUE` strings.
pub fn format_env(env: &[(OsString, OsString)]) -> Vec<String> {
    env.iter()
        .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
        .collect()
}

fn lookup<'a>(env: &'a [(OsString, OsString)], key: &str) -> Option<&'a OsStr> {
    env.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_os_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PATH", "/usr/bin:/bin"),
            ("HOME", "/home/user"),
            ("TERM", "xterm"),
            ("TEST_CUSTOM_VAR", "custom_value"),
            ("TEST_SECRET_KEY", "secret"),
        ]
    }

    #[test]
    fn test_clean_env_keeps_allowlist_and_essentials() {
        let mode = EnvMode::Clean {
            allowlist: vec!["TEST_CUSTOM_VAR".into()],
        };
        let env = format_env(&build_env(&mode, parent()));

        assert_eq!(
            env,
            vec![
                "TEST_CUSTOM_VAR=custom_value",
                "PATH=/usr/bin:/bin",
                "HOME=/home/user",
                "TERM=xterm",
            ]
        );
    }

    #[test]
    fn test_clean_env_no_duplicate_essentials() {
        let mode = EnvMode::Clean {
            allowlist: vec!["PATH".into(), "HOME".into()],
        };
        let env = build_env(&mode, parent());

        let path_count = env.iter().filter(|(k, _)| k == "PATH").count();
        assert_eq!(path_count, 1);
        assert_eq!(env[0].0, "PATH");
    }

    #[test]
    fn test_clean_env_includes_path_with_empty_allowlist() {
        let mode = EnvMode::Clean { allowlist: vec![] };
        let env = build_env(&mode, parent());

        assert!(env.iter().any(|(k, _)| k == "PATH"));
        assert!(!env.iter().any(|(k, _)| k == "TEST_SECRET_KEY"));
        // USER is not set in the parent, so it is not invented
        assert!(!env.iter().any(|(k, _)| k == "USER"));
    }

    #[test]
    fn test_denylist_removes_keys() {
        let mode = EnvMode::Denylist {
            denylist: vec!["TEST_SECRET_KEY".into()],
        };
        let env = format_env(&build_env(&mode, parent()));

        assert!(!env.iter().any(|e| e.starts_with("TEST_SECRET_KEY=")));
        assert!(env.contains(&"TEST_CUSTOM_VAR=custom_value".to_string()));
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_mode_from_config() {
        let config = SandboxConfig {
            clean_env: true,
            env_allowlist: vec!["NODE_ENV".into()],
            ..Default::default()
        };
        assert_eq!(
            EnvMode::from_config(&config),
            EnvMode::Clean {
                allowlist: vec!["NODE_ENV".into()]
            }
        );
    }
}
