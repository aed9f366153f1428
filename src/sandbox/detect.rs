use std::path::{Path, PathBuf};

use super::BackendKind;
use super::macos::SANDBOX_EXEC;

/// Detected sandbox capabilities of the current platform.
#[derive(Debug, Clone)]
pub struct SandboxCapabilities {
    /// Location of `bwrap` on `PATH`, if any.
    pub bwrap: Option<PathBuf>,

    /// Whether `/usr/bin/sandbox-exec` exists.
    pub seatbelt_available: bool,

    /// The backend native to this OS, if there is one.
    pub host_backend: Option<BackendKind>,
}

/// Probe the current system for sandbox launchers.
///
/// This only checks presence. Whether user namespaces work or a profile is
/// accepted is found out when a sandbox is constructed.
pub fn detect_capabilities() -> SandboxCapabilities {
    SandboxCapabilities {
        bwrap: which::which("bwrap").ok(),
        seatbelt_available: Path::new(SANDBOX_EXEC).exists(),
        host_backend: BackendKind::host().ok(),
    }
}

impl SandboxCapabilities {
    /// Whether the host backend's launcher is installed.
    pub fn host_ready(&self) -> bool {
        match self.host_backend {
            Some(BackendKind::Namespace) => self.bwrap.is_some(),
            Some(BackendKind::Profile) => self.seatbelt_available,
            None => false,
        }
    }

    /// Human-readable status lines for the `status` command.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        match self.host_backend {
            Some(BackendKind::Namespace) => match &self.bwrap {
                Some(path) => lines.push(format!("  Bubblewrap: {:<24} ok", path.display())),
                None => lines.push("  Bubblewrap: not found                --".to_string()),
            },
            Some(BackendKind::Profile) => {
                if self.seatbelt_available {
                    lines.push(format!("  Seatbelt:   {:<24} ok", SANDBOX_EXEC));
                } else {
                    lines.push("  Seatbelt:   not available            --".to_string());
                }
            }
            None => lines.push("  Platform:   unsupported              --".to_string()),
        }

        match self.host_backend {
            Some(kind) => lines.push(format!("  Backend:    {kind}")),
            None => lines.push("  Backend:    none".to_string()),
        }

        lines
    }
}
