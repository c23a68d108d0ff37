//! Content-addressed remote store
//!
//! The remote is opaque to callers: artifacts are pushed and pulled by
//! [`Revision`], and a pointer index remembers the last revision pushed for
//! each tracked path (the equivalent of a `.dvc` pointer file).

use crate::hash::{ContentHash, Revision};
use crate::store::{ArtifactStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Push/pull/checkout contract over a content-addressed remote
pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    /// Upload `path` and track it at the resulting revision
    ///
    /// # Errors
    /// Fails if the artifact is missing or the remote is unavailable.
    fn push(&self, path: &Path) -> Result<Revision, StoreError>;

    /// Download `revision` and atomically place it at `dest`
    ///
    /// # Errors
    /// Fails if the revision is absent, corrupt, or the remote is unavailable.
    fn pull(&self, revision: &Revision, dest: &Path) -> Result<(), StoreError>;

    /// Last revision pushed for `path`, if any
    fn tracked_revision(&self, path: &Path) -> Option<Revision>;

    /// Whether the remote can currently be reached
    fn is_available(&self) -> bool;

    /// Restore `path` to its tracked revision
    ///
    /// # Errors
    /// Returns [`StoreError::Untracked`] if no revision is tracked for `path`,
    /// otherwise whatever [`RemoteStore::pull`] returns.
    fn checkout(&self, path: &Path) -> Result<Revision, StoreError> {
        let revision = self
            .tracked_revision(path)
            .ok_or_else(|| StoreError::Untracked(path.to_path_buf()))?;
        self.pull(&revision, path)?;
        Ok(revision)
    }
}

/// A tracked path's pointer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntry {
    /// Revision last pushed for the path
    pub revision: Revision,
    /// Size of the pushed content
    pub size_bytes: u64,
    /// When it was pushed
    pub pushed_at: DateTime<Utc>,
}

/// Remote store backed by a local (or mounted) directory
///
/// Objects live at `<root>/objects/<2 hex>/<62 hex>`; the pointer index is a
/// JSON file kept next to the workspace state.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    root: PathBuf,
    index_path: PathBuf,
    store: ArtifactStore,
}

impl LocalRemote {
    /// Create a remote rooted at `root`, tracking pointers in `index_path`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            store: ArtifactStore::new(root.join("tmp")),
            root,
            index_path: index_path.into(),
        }
    }

    /// Remote root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the remote's directory layout
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn init(&self) -> Result<(), StoreError> {
        let objects = self.root.join("objects");
        fs::create_dir_all(&objects).map_err(|e| StoreError::io(objects, e))
    }

    /// All tracked paths and their entries
    ///
    /// # Errors
    /// Returns [`StoreError::Index`] if the index is unreadable.
    pub fn tracked(&self) -> Result<BTreeMap<PathBuf, TrackedEntry>, StoreError> {
        match fs::read(&self.index_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Index {
                path: self.index_path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::io(&self.index_path, e)),
        }
    }

    /// Whether the object for `revision` is present
    #[must_use]
    pub fn contains(&self, revision: &Revision) -> bool {
        self.object_path(revision).is_file()
    }

    fn object_path(&self, revision: &Revision) -> PathBuf {
        let (dir, name) = revision.object_key();
        self.root.join("objects").join(dir).join(name)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.root.clone()))
        }
    }

    fn record(&self, path: &Path, entry: TrackedEntry) -> Result<(), StoreError> {
        let mut index = self.tracked()?;
        index.insert(path.to_path_buf(), entry);
        let body = serde_json::to_vec_pretty(&index).map_err(|source| StoreError::Index {
            path: self.index_path.clone(),
            source,
        })?;
        self.store.atomic_write(&self.index_path, &body)
    }
}

impl RemoteStore for LocalRemote {
    fn push(&self, path: &Path) -> Result<Revision, StoreError> {
        self.ensure_available()?;
        let fingerprint = ArtifactStore::fingerprint(path)?;
        let revision = fingerprint.content_hash;
        let object = self.object_path(&revision);
        if !object.is_file() {
            self.store.atomic_copy(path, &object)?;
        }
        self.record(
            path,
            TrackedEntry {
                revision,
                size_bytes: fingerprint.size_bytes,
                pushed_at: Utc::now(),
            },
        )?;
        tracing::debug!(path = %path.display(), revision = %revision.short(), "pushed to remote");
        Ok(revision)
    }

    fn pull(&self, revision: &Revision, dest: &Path) -> Result<(), StoreError> {
        self.ensure_available()?;
        let object = self.object_path(revision);
        if !object.is_file() {
            return Err(StoreError::RevisionNotFound(*revision));
        }
        let actual = ContentHash::compute_file(&object).map_err(|e| StoreError::io(&object, e))?;
        if &actual != revision {
            return Err(StoreError::HashMismatch {
                revision: *revision,
                actual,
            });
        }
        self.store.atomic_copy(&object, dest)?;
        tracing::debug!(dest = %dest.display(), revision = %revision.short(), "pulled from remote");
        Ok(())
    }

    fn tracked_revision(&self, path: &Path) -> Option<Revision> {
        self.tracked()
            .ok()
            .and_then(|index| index.get(path).map(|e| e.revision))
    }

    fn is_available(&self) -> bool {
        self.root.join("objects").is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn remote(dir: &TempDir) -> LocalRemote {
        let remote = LocalRemote::new(dir.path().join("remote"), dir.path().join("state/tracked.json"));
        remote.init().unwrap();
        remote
    }

    #[test]
    fn push_then_checkout_restores_content() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir);
        let artifact = dir.path().join("data.csv");
        fs::write(&artifact, b"a\n1\n").unwrap();

        let revision = remote.push(&artifact).unwrap();
        assert!(remote.contains(&revision));
        assert_eq!(remote.tracked_revision(&artifact), Some(revision));

        fs::write(&artifact, b"garbage").unwrap();
        assert_eq!(remote.checkout(&artifact).unwrap(), revision);
        assert_eq!(fs::read(&artifact).unwrap(), b"a\n1\n");
    }

    #[test]
    fn checkout_of_untracked_path_fails() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir);
        let err = remote.checkout(&dir.path().join("nothing.csv")).unwrap_err();
        assert!(matches!(err, StoreError::Untracked(_)));
    }

    #[test]
    fn unavailable_remote_refuses_pull() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir);
        let artifact = dir.path().join("m.json");
        fs::write(&artifact, b"{}").unwrap();
        let revision = remote.push(&artifact).unwrap();

        fs::remove_dir_all(remote.root()).unwrap();
        assert!(!remote.is_available());
        let err = remote.pull(&revision, &artifact).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn pull_detects_tampered_object() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir);
        let artifact = dir.path().join("m.json");
        fs::write(&artifact, b"{\"w\":1}").unwrap();
        let revision = remote.push(&artifact).unwrap();

        fs::write(remote.object_path(&revision), b"tampered").unwrap();
        let err = remote.pull(&revision, &artifact).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert_eq!(fs::read(&artifact).unwrap(), b"{\"w\":1}");
    }

    #[test]
    fn push_deduplicates_identical_content() {
        let dir = TempDir::new().unwrap();
        let remote = remote(&dir);
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        assert_eq!(remote.push(&a).unwrap(), remote.push(&b).unwrap());
        assert_eq!(remote.tracked().unwrap().len(), 2);
    }
}
