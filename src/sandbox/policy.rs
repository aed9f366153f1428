use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::SandboxError;
use super::path::{self, is_under};

/// Pattern that matches every path. Compared by string equality, never globbed.
pub const WILDCARD: &str = "*";

/// Sandbox input as handed over by the config layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Working directory for the sandboxed command.
    pub workdir: String,

    /// Writable paths; `"*"` means writes are not restricted.
    pub allow_write: Vec<String>,

    /// Hidden paths; `"*"` denies reads everywhere but the system allowlist.
    pub deny_read: Vec<String>,

    /// Start from an empty environment plus allowlist and essentials.
    pub clean_env: bool,

    /// Variables passed through when `clean_env` is set.
    pub env_allowlist: Vec<String>,

    /// Variables removed when `clean_env` is not set.
    pub env_denylist: Vec<String>,

    /// Report the native invocation instead of running it.
    pub dry_run: bool,
}

/// Check if a pattern is the wildcard.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern == WILDCARD
}

/// Check if a pattern list contains the wildcard.
pub fn has_wildcard<S: AsRef<str>>(patterns: &[S]) -> bool {
    patterns.iter().any(|p| is_wildcard(p.as_ref()))
}

/// Resolved filesystem policy shared by both backends.
///
/// Deny-read beats allow-write. The writable list is filtered against the
/// deny-read list here, once, so the backends cannot disagree about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    workdir: PathBuf,
    writable: Vec<PathBuf>,
    deny_read: Vec<PathBuf>,
    wildcard_write: bool,
    wildcard_deny_read: bool,
}

impl AccessPolicy {
    /// Resolve every path in `config` and build the policy.
    ///
    /// Relative paths are taken against `base`. Workdir and allow-write
    /// entries must resolve. Deny-read entries that fail resolution fall back
    /// to their expanded form, since a deny target may legitimately be
    /// missing or unreadable on this host.
    pub fn resolve(config: &SandboxConfig, base: &Path) -> Result<Self, SandboxError> {
        let workdir = path::resolve(&config.workdir, base)?;

        let mut allow_write = Vec::new();
        for raw in config.allow_write.iter().filter(|p| !is_wildcard(p)) {
            allow_write.push(path::resolve(raw, base)?);
        }

        let mut deny_read = Vec::new();
        for raw in config.deny_read.iter().filter(|p| !is_wildcard(p)) {
            let resolved = match path::resolve(raw, base) {
                Ok(p) => p,
                Err(SandboxError::InvalidHome) => return Err(SandboxError::InvalidHome),
                Err(e) => {
                    tracing::debug!(path = %raw, error = %e, "using unresolved deny-read path");
                    path::expand(raw, base)?
                }
            };
            deny_read.push(resolved);
        }

        Ok(Self::from_resolved(
            workdir,
            allow_write,
            deny_read,
            has_wildcard(&config.allow_write),
            has_wildcard(&config.deny_read),
        ))
    }

    /// Build a policy from already-resolved paths.
    pub fn from_resolved(
        workdir: PathBuf,
        allow_write: Vec<PathBuf>,
        deny_read: Vec<PathBuf>,
        wildcard_write: bool,
        wildcard_deny_read: bool,
    ) -> Self {
        let mut deny = Vec::with_capacity(deny_read.len());
        for p in deny_read {
            if !deny.contains(&p) {
                deny.push(p);
            }
        }

        let mut writable: Vec<PathBuf> = Vec::with_capacity(allow_write.len());
        for p in allow_write {
            let denied = wildcard_deny_read || deny.iter().any(|d| is_under(&p, d));
            if denied {
                tracing::debug!(path = %p.display(), "allow-write entry dropped: path is deny-read");
                continue;
            }
            if !writable.contains(&p) {
                writable.push(p);
            }
        }

        // Deny-read covers everything, so "write anywhere" cannot survive it.
        if wildcard_write && wildcard_deny_read {
            tracing::debug!("wildcard allow-write dropped: wildcard deny-read is set");
        }

        Self {
            workdir,
            writable,
            deny_read: deny,
            wildcard_write: wildcard_write && !wildcard_deny_read,
            wildcard_deny_read,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Writable paths, with every deny-read path already removed.
    pub fn writable_paths(&self) -> &[PathBuf] {
        &self.writable
    }

    /// Concrete deny-read paths (the wildcard is tracked separately).
    pub fn deny_read_paths(&self) -> &[PathBuf] {
        &self.deny_read
    }

    pub fn has_wildcard_write(&self) -> bool {
        self.wildcard_write
    }

    pub fn has_wildcard_deny_read(&self) -> bool {
        self.wildcard_deny_read
    }

    /// True if `p` is hidden by a deny-read entry (exact or ancestor).
    pub fn is_deny_read(&self, p: &Path) -> bool {
        self.wildcard_deny_read || self.deny_read.iter().any(|d| is_under(p, d))
    }

    /// True if `p` may be written. Always false for deny-read paths.
    pub fn is_writable(&self, p: &Path) -> bool {
        if self.is_deny_read(p) {
            return false;
        }
        self.wildcard_write || self.writable.iter().any(|w| is_under(p, w))
    }
}
