use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{ConfigSource, EXIT_SANDBOX_ERROR};
use crate::sandbox::{self, BackendKind, SandboxConfig, SandboxError, Stdin};

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Working directory (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<String>,

    /// Writable path, replaces the policy file list (repeatable, "*" for all)
    #[arg(long = "allow-write", value_name = "PATH")]
    pub allow_write: Vec<String>,

    /// Hidden path, replaces the policy file list (repeatable, "*" for all)
    #[arg(long = "deny-read", value_name = "PATH")]
    pub deny_read: Vec<String>,

    /// Start from a minimal environment
    #[arg(long)]
    pub clean_env: bool,

    /// Variable passed through with --clean-env (repeatable)
    #[arg(long = "env-allow", value_name = "NAME")]
    pub env_allow: Vec<String>,

    /// Variable removed from the environment (repeatable)
    #[arg(long = "env-deny", value_name = "NAME")]
    pub env_deny: Vec<String>,

    /// Print the sandbox invocation instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Kill the command after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Sandbox backend: auto, namespace (bwrap) or profile (seatbelt)
    #[arg(long, default_value = "auto")]
    pub backend: BackendKind,

    /// Forward this process's stdin to the command
    #[arg(long)]
    pub stdin: bool,

    /// Command to run, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// Overlay the flags onto a config. Lists given on the command line
    /// replace the config lists rather than extending them.
    pub fn apply(&self, mut config: SandboxConfig) -> SandboxConfig {
        if let Some(ref workdir) = self.workdir {
            config.workdir = workdir.clone();
        }
        if !self.allow_write.is_empty() {
            config.allow_write = self.allow_write.clone();
        }
        if !self.deny_read.is_empty() {
            config.deny_read = self.deny_read.clone();
        }
        if self.clean_env {
            config.clean_env = true;
        }
        if !self.env_allow.is_empty() {
            config.env_allowlist = self.env_allow.clone();
        }
        if !self.env_deny.is_empty() {
            config.env_denylist = self.env_deny.clone();
        }
        config.dry_run = self.dry_run;
        config
    }

    fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Timeout(u64),
    Interrupt,
}

/// Run a command in the sandbox and return the exit code to pass through.
///
/// Errors are sandbox setup failures; the caller maps them to
/// [`EXIT_SANDBOX_ERROR`].
pub async fn run(args: ExecArgs, source: &ConfigSource) -> Result<u8> {
    let command = args.command_line();
    if command.trim().is_empty() {
        anyhow::bail!("no command specified");
    }

    let config = args.apply(source.load()?);
    let sb = sandbox::new(&config, args.backend).context("Failed to set up sandbox")?;
    tracing::info!(backend = sb.backend_name(), dry_run = config.dry_run, "running command");

    let cancel = CancellationToken::new();
    let done = CancellationToken::new();
    let watchdog = tokio::spawn(watch(cancel.clone(), done.clone(), args.timeout));

    let stdin: Option<Stdin> = if args.stdin {
        Some(Box::new(tokio::io::stdin()))
    } else {
        None
    };

    let result = sb.run_with_stdin(&command, stdin, &cancel).await;
    done.cancel();
    let stopped = watchdog.await.ok().flatten();

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&result.output)?;
    if config.dry_run && !result.output.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    match (&result.error, stopped) {
        (Some(SandboxError::Cancelled), Some(StopReason::Timeout(secs))) => {
            eprintln!("command timed out after {secs}s");
        }
        (Some(SandboxError::Cancelled), Some(StopReason::Interrupt)) => {
            eprintln!("command interrupted");
        }
        (Some(e), _) => eprintln!("execution error: {e}"),
        (None, _) => {}
    }

    if result.error.is_some() && result.exit_code == 0 {
        return Ok(EXIT_SANDBOX_ERROR);
    }
    Ok(u8::try_from(result.exit_code).unwrap_or(EXIT_SANDBOX_ERROR))
}

/// Cancel `cancel` on timeout or Ctrl-C, until `done` fires.
async fn watch(
    cancel: CancellationToken,
    done: CancellationToken,
    timeout: Option<u64>,
) -> Option<StopReason> {
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        _ = done.cancelled() => return None,
        _ = deadline => StopReason::Timeout(timeout.unwrap_or_default()),
        _ = tokio::signal::ctrl_c() => StopReason::Interrupt,
    };

    tracing::debug!(?reason, "cancelling sandboxed command");
    cancel.cancel();
    Some(reason)
}
