use std::ffi::OsString;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::error::SandboxError;

/// How long output may keep flowing after a cancellation kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Optional input stream for the sandboxed command.
pub type Stdin = Box<dyn AsyncRead + Send + Unpin>;

/// Outcome of one sandboxed run.
///
/// `error` is set only for sandbox failures (spawn, I/O) and cancellation.
/// A command that exits non-zero reports it through `exit_code` alone, so
/// callers check `error` first to tell "exit 0" from "never ran".
#[derive(Debug, Default)]
pub struct RunResult {
    /// Interleaved stdout and stderr.
    pub output: Vec<u8>,
    pub exit_code: i32,
    pub error: Option<SandboxError>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    fn failed(error: SandboxError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Which processes a cancellation kills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillScope {
    /// The whole process group the launcher was spawned into.
    ProcessGroup,
    /// Only the launcher process itself.
    Leader,
}

/// A fully compiled native invocation, ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(OsString, OsString)>,
    pub dry_run: bool,
    /// What dry-run prints instead of running anything.
    pub display: String,
    pub kill_scope: KillScope,
}

/// Run an invocation to completion, or report it in dry-run mode.
///
/// The environment is replaced, not merged. stdout and stderr share one pipe
/// so the output keeps the order the command wrote it in. Once `cancel`
/// fires the result always carries [`SandboxError::Cancelled`], even if the
/// process exited on its own in the meantime.
pub async fn execute(
    invocation: &Invocation,
    stdin: Option<Stdin>,
    cancel: &CancellationToken,
) -> RunResult {
    if invocation.dry_run {
        return RunResult {
            output: invocation.display.clone().into_bytes(),
            ..Default::default()
        };
    }

    let (reader, writer) = match std::io::pipe() {
        Ok(pair) => pair,
        Err(e) => return RunResult::failed(SandboxError::Io(e)),
    };
    // Non-blocking on the reactor, so an abandoned reader is simply dropped
    let reader = match pipe::Receiver::from_owned_fd(OwnedFd::from(reader)) {
        Ok(reader) => reader,
        Err(e) => return RunResult::failed(SandboxError::Io(e)),
    };
    let writer_err = match writer.try_clone() {
        Ok(w) => w,
        Err(e) => return RunResult::failed(SandboxError::Io(e)),
    };

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .env_clear()
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(writer)
        .stderr(writer_err)
        .kill_on_drop(true);

    if invocation.kill_scope == KillScope::ProcessGroup {
        cmd.process_group(0);
    }

    let spawned = cmd.spawn();
    // The command still holds the parent's copies of the pipe writer; the
    // reader only sees EOF once they are closed.
    drop(cmd);

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => return RunResult::failed(SandboxError::Spawn(e)),
    };
    let pid = child.id();
    tracing::debug!(pid, program = %invocation.program.display(), "sandboxed command started");

    let feeder = match (stdin, child.stdin.take()) {
        (Some(mut input), Some(mut child_stdin)) => Some(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut input, &mut child_stdin).await {
                tracing::debug!(error = %e, "stdin forwarding stopped");
            }
        })),
        _ => None,
    };

    let captured = Arc::new(Mutex::new(Vec::new()));
    let mut collector = tokio::spawn(collect(reader, Arc::clone(&captured)));

    let waited = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            terminate(pid, invocation.kill_scope, &mut child);
            child.wait().await
        }
    };

    // Descendants may keep the pipe open after the launcher is gone. Once
    // cancelled, survivors the kill could not reach get a short grace period.
    let drained = tokio::select! {
        out = &mut collector => Some(out),
        _ = cancel.cancelled() => {
            terminate(pid, invocation.kill_scope, &mut child);
            tokio::time::timeout(DRAIN_GRACE, &mut collector).await.ok()
        }
    };

    match drained {
        Some(Ok(Ok(()))) => {}
        Some(Ok(Err(e))) => {
            tracing::warn!(error = %e, "failed to read sandboxed command output");
        }
        Some(Err(e)) => tracing::warn!(error = %e, "output reader task failed"),
        None => {
            tracing::debug!(pid, "output pipe still open after cancellation, abandoning reader");
            collector.abort();
        }
    }

    // Nothing is left to read the input once the command is gone.
    if let Some(feeder) = feeder {
        feeder.abort();
    }

    let output = captured
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default();

    let exit_code = match &waited {
        Ok(status) => exit_code(status),
        Err(_) => 0,
    };

    let error = if cancel.is_cancelled() {
        Some(SandboxError::Cancelled)
    } else {
        waited.err().map(SandboxError::Io)
    };

    tracing::debug!(pid, exit_code, cancelled = cancel.is_cancelled(), "sandboxed command finished");

    RunResult {
        output,
        exit_code,
        error,
    }
}

/// Copy the pipe into `sink` until EOF, keeping whatever arrived on error.
async fn collect(mut reader: pipe::Receiver, sink: Arc<Mutex<Vec<u8>>>) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.lock()
            .map_err(|_| io::Error::other("output buffer poisoned"))?
            .extend_from_slice(&chunk[..n]);
    }
}

/// Numeric exit code, with `128 + signal` for signal deaths.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    if let Some(signal) = status.signal() {
        return 128 + signal;
    }

    0
}

fn terminate(pid: Option<u32>, scope: KillScope, child: &mut tokio::process::Child) {
    if scope == KillScope::ProcessGroup
        && let Some(pid) = pid
    {
        // The group outlives its leader as long as any member is alive.
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => tracing::debug!(pgid = pid, "killed sandbox process group"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = pid, error = %e, "failed to kill process group"),
        }
        return;
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "failed to kill sandboxed command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str, kill_scope: KillScope) -> Invocation {
        Invocation {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            env: std::env::vars_os().collect(),
            dry_run: false,
            display: format!("/bin/sh -c {script}"),
            kill_scope,
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut inv = shell(&format!("touch {}", marker.display()), KillScope::Leader);
        inv.dry_run = true;

        let result = execute(&inv, None, &CancellationToken::new()).await;

        assert_eq!(result.exit_code, 0);
        assert!(result.error.is_none());
        assert_eq!(result.output_lossy(), inv.display);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_combined_output_and_exit_code() {
        let inv = shell("echo out; echo err >&2; exit 3", KillScope::ProcessGroup);
        let result = execute(&inv, None, &CancellationToken::new()).await;

        assert!(result.error.is_none());
        assert_eq!(result.exit_code, 3);
        let out = result.output_lossy();
        assert!(out.contains("out\n"));
        assert!(out.contains("err\n"));
    }

    #[tokio::test]
    async fn test_environment_is_replaced() {
        let mut inv = shell("echo \"[$ONLY_VAR][$HOME]\"", KillScope::Leader);
        inv.env = vec![("ONLY_VAR".into(), "yes".into())];

        let result = execute(&inv, None, &CancellationToken::new()).await;
        assert_eq!(result.output_lossy(), "[yes][]\n");
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let inv = shell("cat", KillScope::Leader);
        let input: Stdin = Box::new(std::io::Cursor::new(b"from stdin".to_vec()));

        let result = execute(&inv, Some(input), &CancellationToken::new()).await;
        assert_eq!(result.output_lossy(), "from stdin");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error_with_zero_exit() {
        let mut inv = shell("true", KillScope::Leader);
        inv.program = PathBuf::from("/nonexistent/launcher");

        let result = execute(&inv, None, &CancellationToken::new()).await;
        assert!(matches!(result.error, Some(SandboxError::Spawn(_))));
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_cancel_reports_cancelled() {
        let inv = shell("sleep 30", KillScope::Leader);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = execute(&inv, None, &cancel).await;

        assert!(matches!(result.error, Some(SandboxError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_after_exit_still_reports_cancelled() {
        let inv = shell("true", KillScope::Leader);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = execute(&inv, None, &cancel).await;
        assert!(matches!(result.error, Some(SandboxError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_leader_does_not_wait_for_orphans() {
        let inv = shell("echo started; sleep 30 & sleep 30", KillScope::Leader);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let result = execute(&inv, None, &cancel).await;

        assert!(matches!(result.error, Some(SandboxError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(result.output_lossy(), "started\n");
    }

    #[test]
    fn test_orphans_do_not_hold_runtime_shutdown() {
        let start = std::time::Instant::now();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(async {
            let (mut tx, rx) = tokio::io::duplex(64);
            let inv = shell("sleep 30 & cat", KillScope::Leader);
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });
            // Keep the input open so the forwarding task is still pending
            tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                let _ = tx.write_all(b"hello\n").await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(tx);
            });
            execute(&inv, Some(Box::new(rx)), &cancel).await
        });
        // Dropping the runtime waits for any blocking task still running
        drop(runtime);

        assert!(matches!(result.error, Some(SandboxError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    fn process_gone(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            // Orphans may linger as zombies until reaped by init
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_kills_process_group_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("child.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let inv = shell(&script, KillScope::ProcessGroup);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = pidfile.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                if watched.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = execute(&inv, None, &cancel).await;
        assert!(matches!(result.error, Some(SandboxError::Cancelled)));

        let pid: i32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..40 {
            if process_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "descendant {pid} survived cancellation");
    }

    #[test]
    fn test_exit_code_from_signal() {
        // Raw wait status for "killed by SIGKILL"
        let status = ExitStatus::from_raw(9);
        assert_eq!(exit_code(&status), 137);
        let status = ExitStatus::from_raw(2 << 8);
        assert_eq!(exit_code(&status), 2);
    }
}
