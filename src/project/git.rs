//! Git helpers - project-root discovery and changed-file listing

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Root of the git repository containing `start`, if any
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .arg("-C")
        .arg(start)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        None
    } else {
        Some(PathBuf::from(root))
    }
}

/// Files changed in the working tree relative to HEAD
///
/// Outside a repository (or in one without commits) this is simply empty;
/// prompts interpolating `{{ changed_files }}` should not fail over it.
pub fn changed_files(root: &Path) -> Vec<String> {
    let output = match Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["diff", "--name-only", "HEAD"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(code = ?output.status.code(), "git diff failed");
            return Vec::new();
        }
        Err(e) => {
            debug!(err = %e, "git not available");
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// The directory work defaults to: the enclosing git root, else `start`
pub fn default_project_dir(start: &Path) -> PathBuf {
    find_git_root(start).unwrap_or_else(|| start.to_path_buf())
}
