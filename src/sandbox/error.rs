use std::path::PathBuf;

/// Errors raised while building a sandbox or running a command through it.
///
/// Construction-time variants (paths, launcher, availability checks) are fatal to the
/// instance. Run-time variants travel inside [`super::RunResult`] next to the
/// captured output. A sandboxed command exiting non-zero is never an error.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("cannot expand '~': home directory is not available")]
    InvalidHome,

    #[error("invalid path '{}': {source}", path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory '{}' is not a directory", path.display())]
    InvalidWorkdir { path: PathBuf },

    #[error("{launcher} not found: {hint}")]
    LauncherNotFound {
        launcher: &'static str,
        hint: &'static str,
    },

    #[error(
        "user namespaces unavailable: run 'sudo sysctl kernel.unprivileged_userns_clone=1' \
         (or check AppArmor userns restrictions): {detail}"
    )]
    NamespaceUnavailable { detail: String },

    #[error("invalid sandbox profile: sandbox-exec rejected it: {detail}")]
    ProfileRejected { detail: String },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to spawn sandboxed command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command cancelled")]
    Cancelled,
}

impl SandboxError {
    /// True for errors that mean the run was cut short by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SandboxError::Cancelled)
    }
}
