//! Version controller
//!
//! Coordinates the remote store, the snapshot log, the model registry and
//! the code revision source behind two operator actions: take a snapshot and
//! roll back to one.

use crate::code::{CodeRevisionSource, GitRevision, StaticRevision, UNVERSIONED};
use crate::error::VersioningError;
use crate::registry::ModelRegistry;
use crate::snapshot::{Snapshot, SnapshotStore};
use chrono::Utc;
use mlops_artifact::{ArtifactStore, LocalRemote, RemoteStore, Revision};
use mlops_core::MlopsConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// What a restore touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreScope {
    /// Restore datasets
    pub data: bool,
    /// Restore models
    pub models: bool,
    /// Check out the recorded code revision
    pub code: bool,
}

impl RestoreScope {
    /// Data, models and code
    #[must_use]
    pub const fn all() -> Self {
        Self {
            data: true,
            models: true,
            code: true,
        }
    }

    /// Data artifacts only
    #[must_use]
    pub const fn data_only() -> Self {
        Self {
            data: true,
            models: false,
            code: false,
        }
    }
}

/// Summary of the workspace relative to its latest snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Current code revision, if under source control
    pub code_revision: Option<String>,
    /// Tag of the latest snapshot
    pub latest_tag: Option<String>,
    /// Artifacts recorded in the latest snapshot
    pub tracked: usize,
    /// Recorded artifacts whose current content differs (or is missing)
    pub modified: Vec<PathBuf>,
}

impl VersionInfo {
    /// Whether every recorded artifact matches its snapshot revision
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty()
    }
}

/// Unified versioning front end
#[derive(Debug, Clone)]
pub struct VersionController {
    root: PathBuf,
    data_dirs: Vec<PathBuf>,
    models_dir: PathBuf,
    remote: Arc<dyn RemoteStore>,
    snapshots: SnapshotStore,
    registry: ModelRegistry,
    code: Arc<dyn CodeRevisionSource>,
}

impl VersionController {
    /// Assemble a controller from explicit collaborators
    #[must_use]
    pub fn new(
        config: &MlopsConfig,
        remote: Arc<dyn RemoteStore>,
        registry: ModelRegistry,
        code: Arc<dyn CodeRevisionSource>,
    ) -> Self {
        Self {
            root: config.root().to_path_buf(),
            data_dirs: vec![
                config.paths.raw_data.clone(),
                config.paths.processed_data.clone(),
            ],
            models_dir: config.paths.models.clone(),
            remote,
            snapshots: SnapshotStore::new(config.snapshot_log_path()),
            registry,
            code,
        }
    }

    /// Controller over the configured local remote, registry and git (if any)
    ///
    /// # Errors
    /// Fails if the remote's directory layout cannot be created.
    pub fn from_config(config: &MlopsConfig) -> Result<Self, VersioningError> {
        let remote = LocalRemote::new(&config.paths.remote, config.tracked_index_path());
        remote.init()?;
        let git = GitRevision::new(config.root());
        let code: Arc<dyn CodeRevisionSource> = if git.detect() {
            Arc::new(git)
        } else {
            Arc::new(StaticRevision::default())
        };
        Ok(Self::new(
            config,
            Arc::new(remote),
            ModelRegistry::new(&config.paths.registry),
            code,
        ))
    }

    /// Remote store used for pushes and restores
    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Model registry
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Snapshot log
    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Record the current state under `version_tag`
    ///
    /// # Errors
    /// Returns [`VersioningError::InvalidTag`] or
    /// [`VersioningError::DuplicateTag`] before touching anything, or a store
    /// error if an artifact cannot be pushed.
    pub fn create_snapshot(
        &self,
        version_tag: &str,
        description: &str,
        include_data: bool,
        include_models: bool,
    ) -> Result<Snapshot, VersioningError> {
        validate_tag(version_tag)?;
        if self.snapshots.contains(version_tag)? {
            return Err(VersioningError::DuplicateTag(version_tag.to_string()));
        }
        tracing::info!(tag = version_tag, description, "creating snapshot");

        let data_revision_ids = if include_data {
            let mut revisions = BTreeMap::new();
            for dir in &self.data_dirs {
                revisions.extend(self.push_tree(dir)?);
            }
            revisions
        } else {
            BTreeMap::new()
        };
        let model_revision_ids = if include_models {
            self.push_tree(&self.models_dir)?
        } else {
            BTreeMap::new()
        };

        let snapshot = Snapshot {
            version_tag: version_tag.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            code_revision_id: self
                .code
                .current_revision()
                .unwrap_or_else(|| UNVERSIONED.to_string()),
            data_revision_ids,
            model_revision_ids,
            experiment_run_id: self.registry.latest_run_id().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "registry unreadable; snapshot has no run id");
                None
            }),
        };
        self.snapshots.append(&snapshot)?;
        tracing::info!(
            tag = version_tag,
            code = %snapshot.code_revision_id,
            data = snapshot.data_revision_ids.len(),
            models = snapshot.model_revision_ids.len(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Restore the parts of `version_tag` selected by `scope`
    ///
    /// Every artifact is attempted; returns `false` if any of them failed.
    ///
    /// # Errors
    /// Returns [`VersioningError::SnapshotNotFound`] if the tag is absent.
    pub fn restore_snapshot(
        &self,
        version_tag: &str,
        scope: RestoreScope,
    ) -> Result<bool, VersioningError> {
        let snapshot = self
            .snapshots
            .get(version_tag)?
            .ok_or_else(|| VersioningError::SnapshotNotFound(version_tag.to_string()))?;
        tracing::info!(
            tag = version_tag,
            created_at = %snapshot.created_at,
            ?scope,
            "restoring snapshot"
        );

        let mut ok = true;
        if scope.code {
            if let Err(e) = self.code.checkout(&snapshot.code_revision_id) {
                tracing::error!(error = %e, "code restore failed");
                ok = false;
            }
        }
        if scope.data {
            ok &= self.restore_revisions(&snapshot.data_revision_ids);
        }
        if scope.models {
            ok &= self.restore_revisions(&snapshot.model_revision_ids);
        }

        if ok {
            tracing::info!(tag = version_tag, "snapshot restored");
        } else {
            tracing::error!(tag = version_tag, "snapshot restored partially");
        }
        Ok(ok)
    }

    /// Restore code, data and models recorded in `version_tag`
    ///
    /// # Errors
    /// Returns [`VersioningError::SnapshotNotFound`] if the tag is absent.
    pub fn rollback_to(&self, version_tag: &str) -> Result<bool, VersioningError> {
        self.restore_snapshot(version_tag, RestoreScope::all())
    }

    /// All snapshots, oldest first
    ///
    /// # Errors
    /// Propagates snapshot log errors.
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>, VersioningError> {
        self.snapshots.list()
    }

    /// Most recent snapshot
    ///
    /// # Errors
    /// Propagates snapshot log errors.
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>, VersioningError> {
        self.snapshots.latest()
    }

    /// Compare the workspace against the latest snapshot
    ///
    /// # Errors
    /// Propagates snapshot log errors.
    pub fn current_version(&self) -> Result<VersionInfo, VersioningError> {
        let latest = self.snapshots.latest()?;
        let (tracked, modified) = match &latest {
            Some(snapshot) => {
                let modified = snapshot
                    .data_revision_ids
                    .iter()
                    .chain(&snapshot.model_revision_ids)
                    .filter(|(key, revision)| !ArtifactStore::matches(&self.root.join(key), revision))
                    .map(|(key, _)| key.clone())
                    .collect();
                (snapshot.artifact_count(), modified)
            }
            None => (0, Vec::new()),
        };
        Ok(VersionInfo {
            code_revision: self.code.current_revision(),
            latest_tag: latest
                .map(|s| s.version_tag)
                .or_else(|| self.code.latest_tag()),
            tracked,
            modified,
        })
    }

    /// Absolute location of a snapshot key
    #[must_use]
    pub fn resolve(&self, key: &Path) -> PathBuf {
        self.root.join(key)
    }

    /// Snapshot key (root-relative when possible) for an artifact path
    #[must_use]
    pub fn key_for(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
    }

    fn push_tree(&self, dir: &Path) -> Result<BTreeMap<PathBuf, Revision>, VersioningError> {
        let mut revisions = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(revisions);
        }
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        {
            let path = entry.path();
            let revision = self.remote.push(path)?;
            revisions.insert(self.key_for(path), revision);
        }
        Ok(revisions)
    }

    fn restore_revisions(&self, revisions: &BTreeMap<PathBuf, Revision>) -> bool {
        let mut ok = true;
        for (key, revision) in revisions {
            let dest = self.resolve(key);
            if ArtifactStore::matches(&dest, revision) {
                continue;
            }
            if let Err(e) = self.remote.pull(revision, &dest) {
                tracing::error!(artifact = %key.display(), error = %e, "artifact restore failed");
                ok = false;
            }
        }
        ok
    }
}

fn validate_tag(tag: &str) -> Result<(), VersioningError> {
    let reason = if tag.is_empty() {
        Some("tag is empty")
    } else if tag.chars().any(char::is_whitespace) {
        Some("tag contains whitespace")
    } else if tag.contains(['/', '\\']) || tag == "." || tag == ".." {
        Some("tag contains a path separator")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(VersioningError::InvalidTag {
            tag: tag.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
