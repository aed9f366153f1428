use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::error::SandboxError;
use super::executor::{self, Invocation, KillScope, RunResult, Stdin};
use super::policy::AccessPolicy;
use super::{Prepared, Sandbox};

pub const SANDBOX_EXEC: &str = "/usr/bin/sandbox-exec";

/// Paths a shell needs to read just to start, kept open under a wildcard
/// deny-read.
const ESSENTIAL_READ_PATHS: &[&str] = &[
    "/usr", "/bin", "/sbin", "/var", "/private", "/dev", "/System", "/Library",
];

/// Sandbox that runs every command under `sandbox-exec` with a compiled
/// Seatbelt profile.
#[derive(Debug)]
pub struct SeatbeltSandbox {
    prepared: Prepared,
    launcher: PathBuf,
    profile: String,
}

impl SeatbeltSandbox {
    /// Compile the profile and validate it with a no-op run.
    ///
    /// A profile `sandbox-exec` rejects fails here, not on the first real
    /// command.
    pub(super) fn new(prepared: Prepared) -> Result<Self, SandboxError> {
        let launcher = PathBuf::from(SANDBOX_EXEC);
        if !launcher.exists() {
            return Err(SandboxError::LauncherNotFound {
                launcher: "sandbox-exec",
                hint: "Seatbelt ships with macOS at /usr/bin/sandbox-exec",
            });
        }

        let sb = Self::with_launcher(prepared, launcher);
        sb.validate_profile()?;
        tracing::info!("seatbelt sandbox ready");
        Ok(sb)
    }

    pub(super) fn with_launcher(prepared: Prepared, launcher: PathBuf) -> Self {
        let profile = generate_profile(&prepared.policy);
        tracing::debug!(profile = %profile, "generated seatbelt profile");
        Self {
            prepared,
            launcher,
            profile,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    fn validate_profile(&self) -> Result<(), SandboxError> {
        let output = std::process::Command::new(&self.launcher)
            .args(["-p", &self.profile, "/usr/bin/true"])
            .stdin(std::process::Stdio::null())
            .output()
            .map_err(|e| SandboxError::ProfileRejected {
                detail: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SandboxError::ProfileRejected {
            detail: format!("{} {}", output.status, stderr.trim()),
        })
    }

    fn invocation(&self, command: &str) -> Invocation {
        let display = format!(
            "sandbox-exec -p '{}' sh -c '{}'",
            self.profile, command
        );
        Invocation {
            program: self.launcher.clone(),
            args: vec![
                "-p".into(),
                self.profile.clone(),
                "sh".into(),
                "-c".into(),
                command.into(),
            ],
            env: self.prepared.env.clone(),
            dry_run: self.prepared.dry_run,
            display,
            // sandbox-exec execs the shell in place; the shell is the leader
            kill_scope: KillScope::Leader,
        }
    }
}

#[async_trait]
impl Sandbox for SeatbeltSandbox {
    async fn run_with_stdin(
        &self,
        command: &str,
        stdin: Option<Stdin>,
        cancel: &CancellationToken,
    ) -> RunResult {
        let invocation = self.invocation(command);
        executor::execute(&invocation, stdin, cancel).await
    }

    fn backend_name(&self) -> &'static str {
        "seatbelt"
    }
}

/// Generate a Seatbelt SBPL profile from an access policy.
///
/// Default-allow with network open. Writes are denied wholesale and then
/// re-allowed per writable path, unless allow-write is the wildcard. Reads
/// are denied per deny-read path, or wholesale (minus the system paths a
/// shell needs) under the wildcard. SBPL lets the last matching rule win, so
/// the blanket denies come first.
pub fn generate_profile(policy: &AccessPolicy) -> String {
    let mut rules = vec![
        "(version 1)".to_string(),
        "(allow default)".to_string(),
        "(allow network*)".to_string(),
    ];

    if !policy.has_wildcard_write() {
        rules.push("(deny file-write*)".to_string());
        for path in policy.writable_paths() {
            rules.push(format!(
                "(allow file-write* (subpath \"{}\"))",
                escape_sbpl_path(path)
            ));
        }
        // A denied subtree under a writable parent stays read-only too.
        for path in policy.deny_read_paths() {
            rules.push(format!(
                "(deny file-write* (subpath \"{}\"))",
                escape_sbpl_path(path)
            ));
        }
    }

    if policy.has_wildcard_deny_read() {
        rules.push("(deny file-read*)".to_string());
        for path in ESSENTIAL_READ_PATHS {
            rules.push(format!(
                "(allow file-read* (subpath \"{}\"))",
                escape_sbpl_path(Path::new(path))
            ));
        }
    } else {
        for path in policy.deny_read_paths() {
            rules.push(format!(
                "(deny file-read* (subpath \"{}\"))",
                escape_sbpl_path(path)
            ));
        }
    }

    let mut profile = rules.join("\n");
    profile.push('\n');
    profile
}

/// Escape a path string for use in SBPL profiles.
fn escape_sbpl_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}
