//! Pipeline stages, persisted stage state and failure markers

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use mlops_artifact::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocessing,
    Training,
    Evaluation,
}

impl Stage {
    /// Every stage, in execution order
    pub const ALL: [Self; 3] = [Self::Preprocessing, Self::Training, Self::Evaluation];

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preprocessing => "preprocessing",
            Self::Training => "training",
            Self::Evaluation => "evaluation",
        }
    }

    /// `self` and every later stage
    #[must_use]
    pub fn stages_from(self) -> &'static [Self] {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        &Self::ALL[idx..]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown stage name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage {0:?}, expected preprocessing, training or evaluation")]
pub struct ParseStageError(String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Last known outcome of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

/// Status of one stage with when it last changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Last recorded status
    pub status: StageStatus,
    /// When the status was recorded
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-stage status persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    stages: BTreeMap<Stage, StageRecord>,
}

impl PipelineState {
    /// Load state from `path`; a missing file is an all-pending state
    ///
    /// # Errors
    /// Fails on unreadable or unparsable state.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        match fs::read(path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| PipelineError::serialization(path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }

    /// Atomically persist to `path`
    ///
    /// # Errors
    /// Fails if the state cannot be written.
    pub fn save(&self, store: &ArtifactStore, path: &Path) -> Result<(), PipelineError> {
        let body =
            serde_json::to_vec_pretty(self).map_err(|e| PipelineError::serialization(path, e))?;
        store.atomic_write(path, &body)?;
        Ok(())
    }

    /// Current status of `stage`
    #[must_use]
    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages.get(&stage).map(|r| r.status).unwrap_or_default()
    }

    /// Full record of `stage`, if it ever changed
    #[must_use]
    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    /// Record a new status for `stage`
    pub fn set(&mut self, stage: Stage, status: StageStatus, detail: Option<String>) {
        self.stages.insert(
            stage,
            StageRecord {
                status,
                updated_at: Utc::now(),
                detail,
            },
        );
    }

    /// Stages currently marked failed, in execution order
    #[must_use]
    pub fn failed_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.status(*s) == StageStatus::Failed)
            .collect()
    }

    /// Whether any stage is marked failed
    #[must_use]
    pub fn any_failed(&self) -> bool {
        !self.failed_stages().is_empty()
    }
}

/// Marker files flagging a stage as failed
#[derive(Debug, Clone)]
pub struct FailureMarker {
    dir: PathBuf,
}

impl FailureMarker {
    /// Markers stored under `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Marker path for `stage`
    #[must_use]
    pub fn path(&self, stage: Stage) -> PathBuf {
        self.dir.join(format!("pipeline_failure_{stage}.marker"))
    }

    /// Whether `stage` has a marker
    #[must_use]
    pub fn is_set(&self, stage: Stage) -> bool {
        self.path(stage).exists()
    }

    /// Write the marker for `stage`
    ///
    /// # Errors
    /// Fails if the marker directory or file cannot be written.
    pub fn set(&self, stage: Stage, reason: &str) -> Result<PathBuf, PipelineError> {
        let path = self.path(stage);
        let body = format!("{}\t{stage}\t{reason}\n", Utc::now().to_rfc3339());
        ArtifactStore::new(&self.dir).atomic_write(&path, body.as_bytes())?;
        Ok(path)
    }

    /// Remove the marker for `stage`; a missing marker is fine
    ///
    /// # Errors
    /// Fails if an existing marker cannot be removed.
    pub fn clear(&self, stage: Stage) -> Result<(), PipelineError> {
        ArtifactStore::remove(&self.path(stage))?;
        Ok(())
    }

    /// Stages with a marker present
    #[must_use]
    pub fn present(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.is_set(*s)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ordering_and_names() {
        assert_eq!(Stage::Training.stages_from(), &[Stage::Training, Stage::Evaluation]);
        assert_eq!(Stage::Preprocessing.stages_from().len(), 3);
        assert_eq!("Training".parse::<Stage>().unwrap(), Stage::Training);
        assert!("deploy".parse::<Stage>().is_err());
        assert_eq!(
            serde_json::to_string(&Stage::Evaluation).unwrap(),
            "\"evaluation\""
        );
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(PipelineState::load(&path).unwrap(), PipelineState::default());

        let mut state = PipelineState::default();
        state.set(Stage::Preprocessing, StageStatus::Succeeded, None);
        state.set(Stage::Training, StageStatus::Failed, Some("boom".into()));
        state.save(&ArtifactStore::new(dir.path()), &path).unwrap();

        let loaded = PipelineState::load(&path).unwrap();
        assert_eq!(loaded.status(Stage::Training), StageStatus::Failed);
        assert_eq!(loaded.status(Stage::Evaluation), StageStatus::Pending);
        assert_eq!(loaded.failed_stages(), vec![Stage::Training]);
        assert_eq!(loaded.record(Stage::Training).unwrap().detail.as_deref(), Some("boom"));
    }

    #[test]
    fn markers_set_and_clear() {
        let dir = TempDir::new().unwrap();
        let markers = FailureMarker::new(dir.path().join("markers"));
        assert!(markers.present().is_empty());

        let path = markers.set(Stage::Evaluation, "simulated").unwrap();
        assert!(path.ends_with("pipeline_failure_evaluation.marker"));
        assert_eq!(markers.present(), vec![Stage::Evaluation]);

        markers.clear(Stage::Evaluation).unwrap();
        markers.clear(Stage::Evaluation).unwrap();
        assert!(!markers.is_set(Stage::Evaluation));
    }
}
