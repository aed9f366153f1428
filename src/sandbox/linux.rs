//! Bubblewrap backend: mount-namespace isolation driven by `bwrap` arguments.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::error::SandboxError;
use super::executor::{self, Invocation, KillScope, RunResult, Stdin};
use super::{Prepared, Sandbox};

/// System paths kept readable when deny-read is the wildcard.
const SYSTEM_READ_ONLY_PATHS: &[&str] = &[
    "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/etc", "/opt", "/nix/store",
];

/// Sandbox that runs every command under `bwrap`.
#[derive(Debug)]
pub struct NamespaceSandbox {
    prepared: Prepared,
    bwrap_bin: PathBuf,
}

impl NamespaceSandbox {
    /// Locate `bwrap` and check that user namespaces work on this host.
    pub(super) fn new(prepared: Prepared) -> Result<Self, SandboxError> {
        let bwrap_bin = which::which("bwrap").map_err(|_| SandboxError::LauncherNotFound {
            launcher: "bubblewrap",
            hint: "install with 'apt install bubblewrap' or 'dnf install bubblewrap'",
        })?;

        probe_user_namespace(&bwrap_bin)?;
        tracing::info!(bwrap = %bwrap_bin.display(), "bubblewrap sandbox ready");

        Ok(Self::with_launcher(prepared, bwrap_bin))
    }

    pub(super) fn with_launcher(prepared: Prepared, bwrap_bin: PathBuf) -> Self {
        Self {
            prepared,
            bwrap_bin,
        }
    }

    /// Compile the policy and `command` into bwrap arguments.
    ///
    /// Mount order matters: later mounts shadow earlier ones, so every
    /// `--tmpfs` hiding a deny-read path must follow the root bind.
    pub fn build_args(&self, command: &str) -> Vec<String> {
        let policy = &self.prepared.policy;
        let mut args: Vec<String> = vec!["--share-net".into(), "--die-with-parent".into()];

        if policy.has_wildcard_deny_read() {
            // No host root at all: only what a shell needs to start
            for system_path in SYSTEM_READ_ONLY_PATHS {
                if Path::new(system_path).exists() {
                    push_mount(&mut args, "--ro-bind", Path::new(system_path));
                }
            }
            args.push("--dir".into());
            args.push(path_arg(policy.workdir()));
        } else if policy.has_wildcard_write() {
            push_mount(&mut args, "--bind", Path::new("/"));
        } else {
            push_mount(&mut args, "--ro-bind", Path::new("/"));
        }

        for path in policy.writable_paths() {
            push_mount(&mut args, "--bind", path);
        }

        for path in policy.deny_read_paths() {
            if !path.exists() {
                tracing::debug!(path = %path.display(), "deny-read path does not exist, nothing to hide");
                continue;
            }
            args.push("--tmpfs".into());
            args.push(path_arg(path));
        }

        args.extend(["--dev", "/dev", "--proc", "/proc"].map(String::from));

        args.push("--chdir".into());
        args.push(path_arg(policy.workdir()));

        args.extend(["sh", "-c", command].map(String::from));
        args
    }

    fn invocation(&self, command: &str) -> Invocation {
        let args = self.build_args(command);
        let display = format!("{} {}", self.bwrap_bin.display(), args.join(" "));
        Invocation {
            program: self.bwrap_bin.clone(),
            args,
            env: self.prepared.env.clone(),
            dry_run: self.prepared.dry_run,
            display,
            kill_scope: KillScope::ProcessGroup,
        }
    }
}

#[async_trait]
impl Sandbox for NamespaceSandbox {
    async fn run_with_stdin(
        &self,
        command: &str,
        stdin: Option<Stdin>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let invocation = self.invocation(command);
        tracing::debug!(args = ?invocation.args, "running under bubblewrap");
        executor::execute(&invocation, stdin, cancel).await
    }

    fn backend_name(&self) -> &'static str {
        "bubblewrap"
    }
}

fn push_mount(args: &mut Vec<String>, flag: &str, path: &Path) {
    let p = path_arg(path);
    args.push(flag.into());
    args.push(p.clone());
    args.push(p);
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Run a no-op through bwrap to confirm unprivileged user namespaces.
fn probe_user_namespace(bwrap_bin: &Path) -> Result<(), SandboxError> {
    let output = std::process::Command::new(bwrap_bin)
        .args(["--ro-bind", "/", "/", "/usr/bin/true"])
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|e| SandboxError::NamespaceUnavailable {
            detail: e.to_string(),
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(SandboxError::NamespaceUnavailable {
        detail: format!("{} {}", output.status, stderr.trim()),
    })
}
