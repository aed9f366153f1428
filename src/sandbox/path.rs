//! Path normalization for policy entries.
//!
//! Every path a backend sees goes through [`resolve`] first: `~` expansion,
//! absolutization against a base directory, lexical cleanup, then symlink
//! resolution. Containment checks on unresolved paths would let a symlink
//! (or a `dir/../other` spelling) walk around a deny rule.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::error::SandboxError;

/// Expand `~`, absolutize against `base`, and resolve symlinks.
///
/// A path that does not exist is returned in its absolute, lexically clean
/// form. Only a missing home directory (for `~` paths) or a filesystem error
/// other than "not found" fails.
pub fn resolve(raw: &str, base: &Path) -> Result<PathBuf, SandboxError> {
    let expanded = expand(raw, base)?;

    match std::fs::canonicalize(&expanded) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(expanded),
        Err(source) => Err(SandboxError::InvalidPath {
            path: expanded,
            source,
        }),
    }
}

/// Expand `~` and absolutize against `base` without touching symlinks.
pub fn expand(raw: &str, base: &Path) -> Result<PathBuf, SandboxError> {
    let expanded = if raw == "~" || raw.starts_with("~/") {
        let home = home_dir().ok_or(SandboxError::InvalidHome)?;
        let home = home.to_string_lossy().into_owned();
        PathBuf::from(shellexpand::tilde_with_context(raw, || Some(home)).into_owned())
    } else {
        PathBuf::from(raw)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };

    Ok(normalize_lexically(&absolute))
}

/// Fold `.` and `..` components and drop trailing separators.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack
                    .last()
                    .is_some_and(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                {
                    stack.pop();
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}

/// True if `path` equals `dir` or lies beneath it.
///
/// Comparison is per component, so `/home/u/.sshkeys` is not under
/// `/home/u/.ssh`.
pub fn is_under(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tilde() {
        let Some(home) = home_dir() else {
            return;
        };
        let resolved = expand("~/test", Path::new("/unused")).unwrap();
        assert_eq!(resolved, normalize_lexically(&home.join("test")));
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let resolved = resolve("./relative/x", Path::new("/nonexistent-base")).unwrap();
        assert_eq!(resolved, PathBuf::from("/nonexistent-base/relative/x"));
    }

    #[test]
    fn test_resolve_absolute_missing_is_kept() {
        let resolved = resolve("/absolute/path/that/does/not/exist", Path::new("/")).unwrap();
        assert_eq!(resolved, PathBuf::from("/absolute/path/that/does/not/exist"));
    }

    #[test]
    fn test_trailing_separator_and_dots_are_folded() {
        let resolved = expand("/home/user/./project/../.ssh/", Path::new("/")).unwrap();
        assert_eq!(resolved, PathBuf::from("/home/user/.ssh"));
    }

    #[test]
    fn test_parent_dir_never_escapes_root() {
        assert_eq!(
            normalize_lexically(Path::new("/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve(link.to_str().unwrap(), Path::new("/")).unwrap();
        assert_eq!(resolved, real.canonicalize().unwrap());
    }

    #[test]
    fn test_is_under_respects_component_boundary() {
        let ssh = Path::new("/home/user/.ssh");
        assert!(is_under(Path::new("/home/user/.ssh"), ssh));
        assert!(is_under(Path::new("/home/user/.ssh/id_rsa"), ssh));
        assert!(!is_under(Path::new("/home/user/.sshkeys"), ssh));
        assert!(!is_under(Path::new("/home/user"), ssh));
    }
}
