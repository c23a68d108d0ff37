//! Model registry
//!
//! Keeps every registered model version together with its own
//! content-addressed copy of the artifact, so a production model can be
//! restored even when the remote store is gone.

use crate::error::VersioningError;
use chrono::{DateTime, Utc};
use mlops_artifact::{ArtifactStore, ContentHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Lifecycle stage of a registered model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStage {
    #[default]
    None,
    Staging,
    Production,
    Archived,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Archived => "archived",
        })
    }
}

/// One registered version of a named model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Registered model name
    pub name: String,
    /// Monotonic per name, starting at 1
    pub version: u32,
    /// Experiment run that produced the artifact
    pub run_id: String,
    /// Hash of the registered artifact
    pub content_hash: ContentHash,
    /// Size of the registered artifact
    pub size_bytes: u64,
    /// Where the artifact lived when it was registered
    pub source_path: PathBuf,
    /// Lifecycle stage
    pub stage: ModelStage,
    /// Registration time
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    versions: Vec<ModelVersion>,
}

/// JSON-backed model registry
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
    store: ArtifactStore,
}

impl ModelRegistry {
    /// Registry rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            store: ArtifactStore::new(root.join("tmp")),
            root,
        }
    }

    /// Registry root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    fn artifact_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join("artifacts").join(hash.to_string())
    }

    /// Whether the registry index exists
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.index_path().is_file()
    }

    fn load(&self) -> Result<RegistryIndex, VersioningError> {
        let path = self.index_path();
        match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| VersioningError::serialization(&path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryIndex::default()),
            Err(e) => Err(VersioningError::io(path, e)),
        }
    }

    fn save(&self, index: &RegistryIndex) -> Result<(), VersioningError> {
        let path = self.index_path();
        let body =
            serde_json::to_vec_pretty(index).map_err(|e| VersioningError::serialization(&path, e))?;
        self.store.atomic_write(&path, &body)?;
        Ok(())
    }

    /// Register the artifact at `path` as a new version of `name`
    ///
    /// A fresh run id is generated when `run_id` is `None`.
    ///
    /// # Errors
    /// Fails if the artifact is missing or the registry cannot be written.
    pub fn register(
        &self,
        name: &str,
        path: &Path,
        run_id: Option<String>,
    ) -> Result<ModelVersion, VersioningError> {
        let fingerprint = ArtifactStore::fingerprint(path)?;
        let copy = self.artifact_path(&fingerprint.content_hash);
        if !copy.is_file() {
            self.store.atomic_copy(path, &copy)?;
        }

        let mut index = self.load()?;
        let version = index
            .versions
            .iter()
            .filter(|v| v.name == name)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let entry = ModelVersion {
            name: name.to_string(),
            version,
            run_id: run_id.unwrap_or_else(|| Ulid::new().to_string()),
            content_hash: fingerprint.content_hash,
            size_bytes: fingerprint.size_bytes,
            source_path: path.to_path_buf(),
            stage: ModelStage::None,
            registered_at: Utc::now(),
        };
        index.versions.push(entry.clone());
        self.save(&index)?;
        tracing::info!(model = name, version, run_id = %entry.run_id, "model registered");
        Ok(entry)
    }

    /// Move a version to `stage`
    ///
    /// Promoting to production archives the previous production version.
    ///
    /// # Errors
    /// Returns [`VersioningError::ModelNotFound`] for an unknown version.
    pub fn transition(
        &self,
        name: &str,
        version: u32,
        stage: ModelStage,
    ) -> Result<ModelVersion, VersioningError> {
        let mut index = self.load()?;
        if !index
            .versions
            .iter()
            .any(|v| v.name == name && v.version == version)
        {
            return Err(VersioningError::ModelNotFound {
                name: name.to_string(),
                version: Some(version),
            });
        }

        let mut updated = None;
        for entry in index.versions.iter_mut().filter(|v| v.name == name) {
            if entry.version == version {
                entry.stage = stage;
                updated = Some(entry.clone());
            } else if stage == ModelStage::Production && entry.stage == ModelStage::Production {
                entry.stage = ModelStage::Archived;
            }
        }
        self.save(&index)?;
        tracing::info!(model = name, version, %stage, "model stage transition");
        updated.ok_or_else(|| VersioningError::ModelNotFound {
            name: name.to_string(),
            version: Some(version),
        })
    }

    /// All versions of `name`, oldest first
    ///
    /// # Errors
    /// Fails if the index is unreadable.
    pub fn versions(&self, name: &str) -> Result<Vec<ModelVersion>, VersioningError> {
        Ok(self
            .load()?
            .versions
            .into_iter()
            .filter(|v| v.name == name)
            .collect())
    }

    /// Highest version of `name` currently in `stage`
    ///
    /// # Errors
    /// Fails if the index is unreadable.
    pub fn latest_in_stage(
        &self,
        name: &str,
        stage: ModelStage,
    ) -> Result<Option<ModelVersion>, VersioningError> {
        Ok(self
            .versions(name)?
            .into_iter()
            .filter(|v| v.stage == stage)
            .max_by_key(|v| v.version))
    }

    /// Latest production version registered from `path`
    ///
    /// Falls back to matching the model name against the file stem.
    ///
    /// # Errors
    /// Returns [`VersioningError::RegistryUnavailable`] if the index is missing.
    pub fn production_for_path(&self, path: &Path) -> Result<Option<ModelVersion>, VersioningError> {
        if !self.is_available() {
            return Err(VersioningError::RegistryUnavailable(self.root.clone()));
        }
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        Ok(self
            .load()?
            .versions
            .into_iter()
            .filter(|v| v.stage == ModelStage::Production)
            .filter(|v| v.source_path == path || stem.as_deref() == Some(v.name.as_str()))
            .max_by_key(|v| (v.source_path == path, v.registered_at, v.version)))
    }

    /// Restore a registered version's artifact to `dest`
    ///
    /// # Errors
    /// Fails if the registry copy is missing or does not hash to the
    /// recorded content hash.
    pub fn restore(&self, version: &ModelVersion, dest: &Path) -> Result<(), VersioningError> {
        let copy = self.artifact_path(&version.content_hash);
        if !ArtifactStore::matches(&copy, &version.content_hash) {
            return Err(VersioningError::ModelNotFound {
                name: version.name.clone(),
                version: Some(version.version),
            });
        }
        self.store.atomic_copy(&copy, dest)?;
        tracing::info!(
            model = %version.name,
            version = version.version,
            dest = %dest.display(),
            "model restored from registry"
        );
        Ok(())
    }

    /// Run id of the most recently registered version of any model
    ///
    /// # Errors
    /// Fails if the index is unreadable.
    pub fn latest_run_id(&self) -> Result<Option<String>, VersioningError> {
        Ok(self
            .load()?
            .versions
            .into_iter()
            .max_by_key(|v| v.registered_at)
            .map(|v| v.run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ModelRegistry, PathBuf) {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::new(dir.path().join("registry"));
        let model = dir.path().join("classifier.json");
        fs::write(&model, b"{\"kind\":\"majority\",\"class\":1}").unwrap();
        (dir, registry, model)
    }

    #[test]
    fn register_assigns_increasing_versions() {
        let (_dir, registry, model) = setup();
        let v1 = registry.register("classifier", &model, None).unwrap();
        fs::write(&model, b"{\"kind\":\"majority\",\"class\":0}").unwrap();
        let v2 = registry
            .register("classifier", &model, Some("run-2".into()))
            .unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(v2.run_id, "run-2");
        assert_eq!(registry.latest_run_id().unwrap().as_deref(), Some("run-2"));
    }

    #[test]
    fn promotion_archives_previous_production() {
        let (_dir, registry, model) = setup();
        registry.register("classifier", &model, None).unwrap();
        registry.register("classifier", &model, None).unwrap();
        registry.transition("classifier", 1, ModelStage::Production).unwrap();
        registry.transition("classifier", 2, ModelStage::Production).unwrap();

        let versions = registry.versions("classifier").unwrap();
        assert_eq!(versions[0].stage, ModelStage::Archived);
        assert_eq!(versions[1].stage, ModelStage::Production);
        assert_eq!(
            registry
                .latest_in_stage("classifier", ModelStage::Production)
                .unwrap()
                .map(|v| v.version),
            Some(2)
        );
    }

    #[test]
    fn transition_of_unknown_version_fails() {
        let (_dir, registry, model) = setup();
        registry.register("classifier", &model, None).unwrap();
        let err = registry
            .transition("classifier", 9, ModelStage::Staging)
            .unwrap_err();
        assert!(matches!(err, VersioningError::ModelNotFound { version: Some(9), .. }));
    }

    #[test]
    fn restore_production_model_after_deletion() {
        let (_dir, registry, model) = setup();
        let original = fs::read(&model).unwrap();
        registry.register("classifier", &model, None).unwrap();
        registry.transition("classifier", 1, ModelStage::Production).unwrap();

        fs::remove_file(&model).unwrap();
        let prod = registry.production_for_path(&model).unwrap().unwrap();
        registry.restore(&prod, &model).unwrap();
        assert_eq!(fs::read(&model).unwrap(), original);
    }

    #[test]
    fn missing_registry_is_unavailable() {
        let (_dir, registry, model) = setup();
        let err = registry.production_for_path(&model).unwrap_err();
        assert!(matches!(err, VersioningError::RegistryUnavailable(_)));
    }
}
