//! Git adapter used to fingerprint repository state.
//!
//! Only read-only plumbing lives here; dun never commits or checks out on the
//! caller's behalf. Mutations are left to harnesses.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::task::fingerprint_digest;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Full commit id of `HEAD`.
    pub fn head_commit(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Raw `git status --porcelain` listing, untracked files included.
    pub fn status_porcelain(&self) -> Result<String> {
        self.run_capture(&["status", "--porcelain=v1", "-uall"])
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Short digest of the current commit and working-tree state.
///
/// Returns an empty string when the state cannot be read (no repository, no
/// commits yet, git missing). Callers decide whether unknown is acceptable.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn fingerprint(root: &Path) -> String {
    let git = Git::new(root);
    let state = git
        .head_commit()
        .and_then(|head| Ok((head, git.status_porcelain()?)));
    match state {
        Ok((head, status)) => {
            let fp = fingerprint_digest(&head, &status);
            debug!(fingerprint = %fp, "computed repository fingerprint");
            fp
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "cannot read repository state");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .status()
            .expect("git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(root: &Path) {
        git(root, &["init", "-q"]);
        git(root, &["config", "user.name", "Dun Test"]);
        git(root, &["config", "user.email", "dun-test@local.invalid"]);
        fs::write(root.join("README.md"), "hello\n").expect("write");
        git(root, &["add", "-A"]);
        git(root, &["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn fingerprint_is_stable_for_unchanged_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_repo(temp.path());
        let first = fingerprint(temp.path());
        assert_eq!(first.len(), 12);
        assert_eq!(first, fingerprint(temp.path()));
    }

    #[test]
    fn fingerprint_changes_with_working_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_repo(temp.path());
        let clean = fingerprint(temp.path());
        fs::write(temp.path().join("README.md"), "changed\n").expect("write");
        let dirty = fingerprint(temp.path());
        assert_ne!(clean, dirty);
        let status = Git::new(temp.path()).status_porcelain().expect("status");
        assert!(status.contains("README.md"));
        fs::write(temp.path().join("new.txt"), "x\n").expect("write");
        assert_ne!(dirty, fingerprint(temp.path()));
    }

    #[test]
    fn fingerprint_is_empty_outside_a_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(fingerprint(temp.path()), "");
    }
}
