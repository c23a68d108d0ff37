//! Code revision sources
//!
//! Snapshots record which code revision was live; rollback can check it
//! out again. Git is driven through its CLI.

use crate::error::VersioningError;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Revision id recorded when no source control is available
pub const UNVERSIONED: &str = "unversioned";

/// Source of the current code revision
pub trait CodeRevisionSource: Send + Sync + std::fmt::Debug {
    /// Current revision id, if the workspace is under source control
    fn current_revision(&self) -> Option<String>;

    /// Most recent tag reachable from the current revision
    fn latest_tag(&self) -> Option<String> {
        None
    }

    /// Switch the working tree to `revision`
    ///
    /// # Errors
    /// Returns [`VersioningError::Code`] if the checkout fails.
    fn checkout(&self, revision: &str) -> Result<(), VersioningError>;
}

/// Git working tree
#[derive(Debug, Clone)]
pub struct GitRevision {
    workdir: PathBuf,
}

impl GitRevision {
    /// Git source for the repository containing `workdir`
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Whether `git` works in the directory
    #[must_use]
    pub fn detect(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"]).is_some()
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

impl CodeRevisionSource for GitRevision {
    fn current_revision(&self) -> Option<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn latest_tag(&self) -> Option<String> {
        self.git(&["describe", "--tags", "--abbrev=0"])
    }

    fn checkout(&self, revision: &str) -> Result<(), VersioningError> {
        let status = Command::new("git")
            .args(["checkout", revision])
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| VersioningError::Code(format!("failed to spawn git: {e}")))?;
        if status.success() {
            tracing::info!(revision, "code checked out");
            Ok(())
        } else {
            Err(VersioningError::Code(format!(
                "git checkout {revision} exited with {status}"
            )))
        }
    }
}

/// Fixed revision for workspaces without source control
#[derive(Debug, Clone)]
pub struct StaticRevision(pub String);

impl Default for StaticRevision {
    fn default() -> Self {
        Self(UNVERSIONED.to_string())
    }
}

impl CodeRevisionSource for StaticRevision {
    fn current_revision(&self) -> Option<String> {
        Some(self.0.clone())
    }

    fn checkout(&self, revision: &str) -> Result<(), VersioningError> {
        if revision != self.0 {
            tracing::warn!(revision, current = %self.0, "code is not under source control; skipping checkout");
        }
        Ok(())
    }
}
