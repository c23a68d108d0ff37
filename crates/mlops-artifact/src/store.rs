//! Local artifact store
//!
//! All mutations of artifacts go through [`ArtifactStore`]: content is first
//! written to a temporary file in the destination directory and then renamed
//! into place, so an interrupted write never leaves a half-written artifact.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Size and content hash of an artifact at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// File size in bytes
    pub size_bytes: u64,
    /// Blake3 hash of the file content
    pub content_hash: ContentHash,
}

/// A local timestamped copy of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Where the copy lives
    pub backup_path: PathBuf,
    /// The artifact that was copied
    pub original_path: PathBuf,
    /// Fingerprint of the copied bytes
    pub fingerprint: Fingerprint,
    /// When the copy was taken
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    backup_root: PathBuf,
}

impl ArtifactStore {
    /// Create a store that keeps backups under `backup_root`
    #[inline]
    #[must_use]
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    /// Directory holding timestamped backups
    #[inline]
    #[must_use]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Atomically replace `path` with `bytes`
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the temporary file cannot be written or
    /// renamed; the destination is left untouched in that case.
    pub fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let mut tmp = Self::temp_beside(path)?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(path, e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "atomic write");
        Ok(())
    }

    /// Atomically replace `dest` with the content of `src`
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if `src` does not exist, or
    /// [`StoreError::Io`] on read/write failure.
    pub fn atomic_copy(&self, src: &Path, dest: &Path) -> Result<(), StoreError> {
        let mut reader = File::open(src).map_err(|e| StoreError::open(src, e))?;
        let mut tmp = Self::temp_beside(dest)?;
        io::copy(&mut reader, &mut tmp)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(dest, e))?;
        tmp.persist(dest).map_err(|e| StoreError::io(dest, e.error))?;
        tracing::trace!(src = %src.display(), dest = %dest.display(), "atomic copy");
        Ok(())
    }

    /// Copy `path` to a new timestamped backup location
    ///
    /// Every call produces a distinct backup file.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if `path` does not exist, or
    /// [`StoreError::Io`] if the backup cannot be written.
    pub fn backup(&self, path: &Path) -> Result<BackupRecord, StoreError> {
        if !path.is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let created_at = Utc::now();
        let file_name = path
            .file_name()
            .map_or_else(|| "artifact".to_string(), |n| n.to_string_lossy().into_owned());
        let stamp = created_at.format("%Y%m%dT%H%M%S%.6f");

        fs::create_dir_all(&self.backup_root).map_err(|e| StoreError::io(&self.backup_root, e))?;
        let mut backup_path = self.backup_root.join(format!("{file_name}.{stamp}.bak"));
        let mut suffix = 1u32;
        while backup_path.exists() {
            backup_path = self
                .backup_root
                .join(format!("{file_name}.{stamp}-{suffix}.bak"));
            suffix += 1;
        }

        self.atomic_copy(path, &backup_path)?;
        let fingerprint = Self::fingerprint(&backup_path)?;
        tracing::debug!(
            original = %path.display(),
            backup = %backup_path.display(),
            hash = %fingerprint.content_hash.short(),
            "backup taken"
        );
        Ok(BackupRecord {
            backup_path,
            original_path: path.to_path_buf(),
            fingerprint,
            created_at,
        })
    }

    /// Size and content hash of `path`
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if `path` does not exist.
    pub fn fingerprint(path: &Path) -> Result<Fingerprint, StoreError> {
        let meta = fs::metadata(path).map_err(|e| StoreError::open(path, e))?;
        let content_hash = ContentHash::compute_file(path).map_err(|e| StoreError::open(path, e))?;
        Ok(Fingerprint {
            size_bytes: meta.len(),
            content_hash,
        })
    }

    /// Whether `path` exists and hashes to `expected`
    #[must_use]
    pub fn matches(path: &Path, expected: &ContentHash) -> bool {
        path.is_file() && ContentHash::compute_file(path).is_ok_and(|h| &h == expected)
    }

    /// Remove `path`, treating an already-missing file as success
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] for any other failure.
    pub fn remove(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn temp_beside(path: &Path) -> Result<NamedTempFile, StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&dir)
            .map_err(|e| StoreError::io(&dir, e))
    }
}

/// Errors from artifact store and remote store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Artifact does not exist
    #[error("artifact not found: {}", .0.display())]
    NotFound(PathBuf),

    /// IO error on a specific path
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored object does not hash to its revision id
    #[error("hash mismatch for {revision}: got {actual}")]
    HashMismatch {
        revision: ContentHash,
        actual: ContentHash,
    },

    /// Revision is not present in the remote store
    #[error("revision not found in remote: {0}")]
    RevisionNotFound(ContentHash),

    /// No revision is tracked for the path
    #[error("no tracked revision for {}", .0.display())]
    Untracked(PathBuf),

    /// Remote store cannot be reached
    #[error("remote store unavailable at {}", .0.display())]
    Unavailable(PathBuf),

    /// Pointer index could not be (de)serialized
    #[error("corrupt index {}: {source}", path.display())]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map an error from opening `path`, turning `NotFound` into [`StoreError::NotFound`]
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("backups"));
        (dir, store)
    }

    #[test]
    fn atomic_write_creates_parent_dirs() {
        let (dir, store) = store();
        let target = dir.path().join("a/b/data.csv");
        store.atomic_write(&target, b"x,y\n").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"x,y\n");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let (dir, store) = store();
        let target = dir.path().join("model.json");
        store.atomic_write(&target, b"{}").unwrap();
        store.atomic_write(&target, b"{\"a\":1}").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["model.json".to_string()]);
    }

    #[test]
    fn backup_preserves_bytes_and_fingerprint() {
        let (dir, store) = store();
        let target = dir.path().join("data.csv");
        fs::write(&target, b"a,b\n1,2\n").unwrap();

        let record = store.backup(&target).unwrap();
        assert_eq!(fs::read(&record.backup_path).unwrap(), b"a,b\n1,2\n");
        assert_eq!(record.fingerprint.size_bytes, 8);
        assert_eq!(record.fingerprint.content_hash, ContentHash::compute(b"a,b\n1,2\n"));
        assert!(record.backup_path.starts_with(store.backup_root()));
    }

    #[test]
    fn repeated_backups_are_distinct() {
        let (dir, store) = store();
        let target = dir.path().join("data.csv");
        fs::write(&target, b"a\n").unwrap();
        let first = store.backup(&target).unwrap();
        let second = store.backup(&target).unwrap();
        assert_ne!(first.backup_path, second.backup_path);
    }

    #[test]
    fn backup_of_missing_file_is_not_found() {
        let (dir, store) = store();
        let err = store.backup(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn atomic_copy_from_missing_source_keeps_destination() {
        let (dir, store) = store();
        let dest = dir.path().join("model.json");
        fs::write(&dest, b"original").unwrap();
        let err = store
            .atomic_copy(&dir.path().join("gone"), &dest)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(fs::read(&dest).unwrap(), b"original");
    }

    #[test]
    fn matches_and_remove() {
        let (dir, _store) = store();
        let target = dir.path().join("m.bin");
        fs::write(&target, b"bytes").unwrap();
        assert!(ArtifactStore::matches(&target, &ContentHash::compute(b"bytes")));
        ArtifactStore::remove(&target).unwrap();
        ArtifactStore::remove(&target).unwrap();
        assert!(!ArtifactStore::matches(&target, &ContentHash::compute(b"bytes")));
    }
}
