//! Filesystem sandbox for shell commands run on behalf of an agent.
//!
//! A [`SandboxConfig`] is resolved once into an [`AccessPolicy`] and a child
//! environment, then compiled into a native invocation for one of two
//! backends:
//! - Linux: bubblewrap mount namespaces (`bwrap` arguments)
//! - macOS: Seatbelt SBPL profiles via `sandbox-exec`
//!
//! Network access is never restricted.

pub mod detect;
pub mod env;
pub mod error;
pub mod executor;
pub mod linux;
pub mod macos;
pub mod path;
pub mod policy;

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

pub use detect::{SandboxCapabilities, detect_capabilities};
pub use env::{EnvMode, build_env, format_env};
pub use error::SandboxError;
pub use executor::{RunResult, Stdin};
pub use linux::NamespaceSandbox;
pub use macos::SeatbeltSandbox;
pub use policy::{AccessPolicy, SandboxConfig, WILDCARD, has_wildcard, is_wildcard};

/// A constructed sandbox, ready to run commands.
///
/// Instances are immutable; concurrent runs spawn independent processes.
#[async_trait]
pub trait Sandbox: Send + Sync + fmt::Debug {
    /// Run `command` through `sh -c` inside the sandbox, feeding `stdin` if
    /// given. Cancelling `cancel` terminates the run.
    async fn run_with_stdin(
        &self,
        command: &str,
        stdin: Option<Stdin>,
        cancel: &CancellationToken,
    ) -> RunResult;

    async fn run(&self, command: &str, cancel: &CancellationToken) -> RunResult {
        self.run_with_stdin(command, None, cancel).await
    }

    fn backend_name(&self) -> &'static str;
}

/// Which native mechanism enforces the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// bubblewrap (Linux).
    Namespace,
    /// Seatbelt via `sandbox-exec` (macOS).
    Profile,
}

impl BackendKind {
    /// The backend native to the running OS.
    pub fn host() -> Result<Self, SandboxError> {
        match std::env::consts::OS {
            "linux" => Ok(BackendKind::Namespace),
            "macos" => Ok(BackendKind::Profile),
            other => Err(SandboxError::UnsupportedPlatform(other.to_string())),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => BackendKind::host().map_err(|e| e.to_string()),
            "namespace" | "bwrap" | "bubblewrap" => Ok(BackendKind::Namespace),
            "profile" | "seatbelt" => Ok(BackendKind::Profile),
            other => Err(format!(
                "unknown backend '{other}' (expected auto, namespace or profile)"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Namespace => write!(f, "namespace"),
            BackendKind::Profile => write!(f, "profile"),
        }
    }
}

/// Policy and environment shared by every backend, resolved once.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) policy: AccessPolicy,
    pub(crate) env: Vec<(OsString, OsString)>,
    pub(crate) dry_run: bool,
}

impl Prepared {
    fn new<I, K, V>(config: &SandboxConfig, current_env: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self::with_base(config, current_env, std::env::current_dir)
    }

    /// `base` is only consulted when some configured path is relative, so a
    /// deleted current directory does not break an all-absolute policy.
    fn with_base<I, K, V>(
        config: &SandboxConfig,
        current_env: I,
        base: impl FnOnce() -> std::io::Result<PathBuf>,
    ) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let base = if needs_base(config) {
            base()?
        } else {
            PathBuf::from("/")
        };
        let policy = AccessPolicy::resolve(config, &base)?;

        let workdir = policy.workdir();
        match std::fs::metadata(workdir) {
            Ok(meta) if !meta.is_dir() => {
                return Err(SandboxError::InvalidWorkdir {
                    path: workdir.to_path_buf(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(workdir = %workdir.display(), error = %e, "workdir is not accessible");
            }
        }

        let env = build_env(&EnvMode::from_config(config), current_env);

        Ok(Self {
            policy,
            env,
            dry_run: config.dry_run,
        })
    }
}

fn needs_base(config: &SandboxConfig) -> bool {
    let relative = |raw: &str| !raw.starts_with('~') && !Path::new(raw).is_absolute();
    relative(&config.workdir)
        || config
            .allow_write
            .iter()
            .chain(&config.deny_read)
            .filter(|raw| !is_wildcard(raw.as_str()))
            .any(|raw| relative(raw.as_str()))
}

/// Build a sandbox for `config` using the current process environment.
pub fn new(config: &SandboxConfig, kind: BackendKind) -> Result<Box<dyn Sandbox>, SandboxError> {
    new_with_env(config, kind, std::env::vars_os())
}

/// Build a sandbox whose child environment is derived from `env` instead of
/// the current process environment.
pub fn new_with_env<I, K, V>(
    config: &SandboxConfig,
    kind: BackendKind,
    env: I,
) -> Result<Box<dyn Sandbox>, SandboxError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let prepared = Prepared::new(config, env)?;
    tracing::debug!(
        backend = %kind,
        writable = ?prepared.policy.writable_paths(),
        deny_read = ?prepared.policy.deny_read_paths(),
        "sandbox policy resolved"
    );

    let sandbox: Box<dyn Sandbox> = match kind {
        BackendKind::Namespace => Box::new(NamespaceSandbox::new(prepared)?),
        BackendKind::Profile => Box::new(SeatbeltSandbox::new(prepared)?),
    };
    Ok(sandbox)
}
