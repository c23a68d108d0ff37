//! Append-only snapshot log
//!
//! One JSON object per line, in creation order. Entries are never rewritten
//! or removed.

use crate::error::VersioningError;
use chrono::{DateTime, Utc};
use mlops_artifact::Revision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Point-in-time record of code, data, model and experiment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique tag, e.g. `v1.2.0`
    pub version_tag: String,
    /// Free-form description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Code revision, or `unversioned`
    pub code_revision_id: String,
    /// Data artifact (relative to the workspace root) → revision
    pub data_revision_ids: BTreeMap<PathBuf, Revision>,
    /// Model artifact (relative to the workspace root) → revision
    pub model_revision_ids: BTreeMap<PathBuf, Revision>,
    /// Latest registry run id at creation
    pub experiment_run_id: Option<String>,
}

impl Snapshot {
    /// Revision recorded for `artifact`, looking in data then models
    #[must_use]
    pub fn revision_of(&self, artifact: &Path) -> Option<&Revision> {
        self.data_revision_ids
            .get(artifact)
            .or_else(|| self.model_revision_ids.get(artifact))
    }

    /// Number of artifacts recorded
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.data_revision_ids.len() + self.model_revision_ids.len()
    }
}

/// Snapshot log keyed by unique tag
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Open (lazily) the log at `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a snapshot
    ///
    /// # Errors
    /// Returns [`VersioningError::DuplicateTag`] if the tag is already present.
    pub fn append(&self, snapshot: &Snapshot) -> Result<(), VersioningError> {
        if self.contains(&snapshot.version_tag)? {
            return Err(VersioningError::DuplicateTag(snapshot.version_tag.clone()));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| VersioningError::io(parent, e))?;
        }
        let mut line = serde_json::to_string(snapshot)
            .map_err(|e| VersioningError::serialization(&self.path, e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| VersioningError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| VersioningError::io(&self.path, e))?;
        tracing::debug!(tag = %snapshot.version_tag, log = %self.path.display(), "snapshot appended");
        Ok(())
    }

    /// All snapshots in creation order
    ///
    /// A missing log is an empty log.
    ///
    /// # Errors
    /// Returns [`VersioningError::Serialization`] on a corrupt line.
    pub fn list(&self) -> Result<Vec<Snapshot>, VersioningError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VersioningError::io(&self.path, e)),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| VersioningError::serialization(&self.path, e))
            })
            .collect()
    }

    /// Snapshot with `tag`, if any
    ///
    /// # Errors
    /// Propagates [`SnapshotStore::list`] errors.
    pub fn get(&self, tag: &str) -> Result<Option<Snapshot>, VersioningError> {
        Ok(self.list()?.into_iter().find(|s| s.version_tag == tag))
    }

    /// Whether `tag` exists
    ///
    /// # Errors
    /// Propagates [`SnapshotStore::list`] errors.
    pub fn contains(&self, tag: &str) -> Result<bool, VersioningError> {
        Ok(self.get(tag)?.is_some())
    }

    /// Most recently created snapshot
    ///
    /// # Errors
    /// Propagates [`SnapshotStore::list`] errors.
    pub fn latest(&self) -> Result<Option<Snapshot>, VersioningError> {
        Ok(self.list()?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlops_artifact::ContentHash;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn snapshot(tag: &str) -> Snapshot {
        let mut data = BTreeMap::new();
        data.insert(PathBuf::from("data/raw/d.csv"), ContentHash::compute(tag.as_bytes()));
        Snapshot {
            version_tag: tag.to_string(),
            description: format!("snapshot {tag}"),
            created_at: Utc::now(),
            code_revision_id: "unversioned".to_string(),
            data_revision_ids: data,
            model_revision_ids: BTreeMap::new(),
            experiment_run_id: None,
        }
    }

    #[test]
    fn append_list_latest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snaps/snapshots.jsonl"));
        assert!(store.latest().unwrap().is_none());

        store.append(&snapshot("v1")).unwrap();
        store.append(&snapshot("v2")).unwrap();

        let tags: Vec<_> = store.list().unwrap().into_iter().map(|s| s.version_tag).collect();
        assert_eq!(tags, vec!["v1".to_string(), "v2".to_string()]);
        assert_eq!(store.latest().unwrap().unwrap().version_tag, "v2");
        assert_eq!(store.get("v1").unwrap().unwrap(), store.list().unwrap()[0]);
    }

    #[test]
    fn duplicate_tag_is_rejected_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots.jsonl"));
        store.append(&snapshot("v1.0.0")).unwrap();
        let before = fs::read(store.path()).unwrap();

        let err = store.append(&snapshot("v1.0.0")).unwrap_err();
        assert!(matches!(err, VersioningError::DuplicateTag(ref t) if t == "v1.0.0"));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn revision_lookup_covers_data_and_models() {
        let mut snap = snapshot("v1");
        let model = PathBuf::from("models/trained/classifier.json");
        snap.model_revision_ids
            .insert(model.clone(), ContentHash::compute(b"model"));
        assert!(snap.revision_of(Path::new("data/raw/d.csv")).is_some());
        assert_eq!(snap.revision_of(&model), Some(&ContentHash::compute(b"model")));
        assert_eq!(snap.artifact_count(), 2);
    }

    #[test]
    fn corrupt_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshots.jsonl");
        fs::write(&path, "{not json}\n").unwrap();
        let err = SnapshotStore::new(&path).list().unwrap_err();
        assert!(matches!(err, VersioningError::Serialization { .. }));
    }
}
