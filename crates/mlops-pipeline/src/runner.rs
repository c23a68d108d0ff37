//! Stage runner
//!
//! preprocessing: raw dataset → cleaned train/test split
//! training:      train split → model JSON
//! evaluation:    model + test split → metrics JSON

use crate::error::PipelineError;
use crate::model::{Dataset, TrainedModel};
use crate::stage::{FailureMarker, PipelineState, Stage, StageStatus};
use chrono::{DateTime, Utc};
use mlops_artifact::{ArtifactStore, Table};
use mlops_core::{MlopsConfig, ModelChoice};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Evaluation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Model variant that was evaluated
    pub model: ModelChoice,
    /// Fraction of test rows predicted correctly
    pub accuracy: f64,
    /// Rows in the train split
    pub train_rows: usize,
    /// Rows in the test split
    pub test_rows: usize,
    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
}

/// What a run executed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Stages executed, in order
    pub stages: Vec<Stage>,
    /// Rows dropped by preprocessing (missing cells, duplicates)
    pub rows_dropped: Option<usize>,
    /// Set when evaluation ran
    pub metrics: Option<Metrics>,
}

/// Runs pipeline stages against the configured workspace
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    raw_dataset: PathBuf,
    processed_dir: PathBuf,
    model_path: PathBuf,
    metrics_path: PathBuf,
    state_path: PathBuf,
    target_column: String,
    model_choice: ModelChoice,
    test_every: usize,
    missing_marker: String,
    markers: FailureMarker,
    store: ArtifactStore,
}

impl PipelineRunner {
    /// Runner over the configured paths
    #[must_use]
    pub fn new(config: &MlopsConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            raw_dataset: config.paths.raw_data.join(&pipeline.dataset),
            processed_dir: config.paths.processed_data.clone(),
            model_path: config.paths.models.join(format!("{}.json", pipeline.model_name)),
            metrics_path: config.paths.state.join("metrics.json"),
            state_path: config.pipeline_state_path(),
            target_column: pipeline.target_column.clone(),
            model_choice: pipeline.model,
            test_every: pipeline.test_every.max(2),
            missing_marker: config.incident.missing_marker.clone(),
            markers: FailureMarker::new(&config.paths.markers),
            store: ArtifactStore::new(&config.paths.backups),
        }
    }

    /// Raw dataset read by preprocessing
    #[must_use]
    pub fn raw_dataset_path(&self) -> &Path {
        &self.raw_dataset
    }

    /// Train split written by preprocessing
    #[must_use]
    pub fn train_path(&self) -> PathBuf {
        self.processed_dir.join("train.csv")
    }

    /// Test split written by preprocessing
    #[must_use]
    pub fn test_path(&self) -> PathBuf {
        self.processed_dir.join("test.csv")
    }

    /// Model written by training
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Metrics written by evaluation
    #[must_use]
    pub fn metrics_path(&self) -> &Path {
        &self.metrics_path
    }

    /// Failure markers for each stage
    #[must_use]
    pub fn markers(&self) -> &FailureMarker {
        &self.markers
    }

    /// Files `stage` reads
    #[must_use]
    pub fn stage_inputs(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Preprocessing => vec![self.raw_dataset.clone()],
            Stage::Training => vec![self.train_path()],
            Stage::Evaluation => vec![self.model_path.clone(), self.test_path()],
        }
    }

    /// Files `stage` writes
    #[must_use]
    pub fn stage_outputs(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Preprocessing => vec![self.train_path(), self.test_path()],
            Stage::Training => vec![self.model_path.clone()],
            Stage::Evaluation => vec![self.metrics_path.clone()],
        }
    }

    /// Persisted stage state
    ///
    /// # Errors
    /// Fails if the state file is unreadable.
    pub fn state(&self) -> Result<PipelineState, PipelineError> {
        PipelineState::load(&self.state_path)
    }

    /// Flag `stage` as failed: marker file plus persisted state
    ///
    /// # Errors
    /// Fails if the marker or state cannot be written.
    pub fn mark_failed(&self, stage: Stage, reason: &str) -> Result<PathBuf, PipelineError> {
        let marker = self.markers.set(stage, reason)?;
        self.set_status(stage, StageStatus::Failed, Some(reason.to_string()))?;
        tracing::warn!(%stage, reason, "stage marked failed");
        Ok(marker)
    }

    /// Clear the failure marker of `stage` and set it back to pending
    ///
    /// # Errors
    /// Fails if the marker cannot be removed or state cannot be written.
    pub fn reset_stage(&self, stage: Stage) -> Result<(), PipelineError> {
        self.markers.clear(stage)?;
        self.set_status(stage, StageStatus::Pending, None)?;
        tracing::info!(%stage, "stage reset");
        Ok(())
    }

    /// Run every stage in order
    ///
    /// # Errors
    /// Stops at the first failing stage.
    pub fn run_all(&self) -> Result<PipelineReport, PipelineError> {
        self.run_from(Stage::Preprocessing)
    }

    /// Run `stage` and every later stage
    ///
    /// A stage whose failure marker is present is not executed and fails
    /// with [`PipelineError::StageFailed`].
    ///
    /// # Errors
    /// Stops at the first failing stage; that stage is persisted as failed.
    pub fn run_from(&self, stage: Stage) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::default();
        for &current in stage.stages_from() {
            let span = tracing::info_span!("stage", stage = %current);
            let _enter = span.enter();
            match self.run_stage(current, &mut report) {
                Ok(()) => {
                    self.set_status(current, StageStatus::Succeeded, None)?;
                    report.stages.push(current);
                    tracing::info!("stage succeeded");
                }
                Err(e) => {
                    tracing::error!(error = %e, "stage failed");
                    self.set_status(current, StageStatus::Failed, Some(e.to_string()))?;
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    fn run_stage(&self, stage: Stage, report: &mut PipelineReport) -> Result<(), PipelineError> {
        if self.markers.is_set(stage) {
            return Err(PipelineError::StageFailed {
                stage,
                reason: format!("failure marker present at {}", self.markers.path(stage).display()),
            });
        }
        if let Some(path) = self.stage_inputs(stage).into_iter().find(|p| !p.is_file()) {
            return Err(PipelineError::MissingInput { stage, path });
        }
        match stage {
            Stage::Preprocessing => {
                report.rows_dropped = Some(self.preprocess()?);
            }
            Stage::Training => self.train()?,
            Stage::Evaluation => report.metrics = Some(self.evaluate()?),
        }
        Ok(())
    }

    fn preprocess(&self) -> Result<usize, PipelineError> {
        let mut table = Table::read(&self.raw_dataset)?;
        table.integrity()?;
        if table.column_index(&self.target_column).is_none() {
            return Err(PipelineError::MissingColumn(self.target_column.clone()));
        }
        let dropped = table.clean(&self.missing_marker);

        let (mut train, mut test) = (Vec::new(), Vec::new());
        for (idx, row) in table.rows().iter().enumerate() {
            if idx % self.test_every == self.test_every - 1 {
                test.push(row.clone());
            } else {
                train.push(row.clone());
            }
        }
        if train.is_empty() || test.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        let header = table.header().to_vec();
        let (train_rows, test_rows) = (train.len(), test.len());
        self.store
            .atomic_write(&self.train_path(), Table::new(header.clone(), train).to_csv().as_bytes())?;
        self.store
            .atomic_write(&self.test_path(), Table::new(header, test).to_csv().as_bytes())?;
        tracing::debug!(dropped, train_rows, test_rows, "dataset split");
        Ok(dropped)
    }

    fn train(&self) -> Result<(), PipelineError> {
        let data = Dataset::from_table(&Table::read(&self.train_path())?, &self.target_column)?;
        let mut model = TrainedModel::new(self.model_choice);
        model.as_model_mut().fit(&data.features, &data.labels)?;
        let body = serde_json::to_vec_pretty(&model)
            .map_err(|e| PipelineError::serialization(&self.model_path, e))?;
        self.store.atomic_write(&self.model_path, &body)?;
        tracing::debug!(samples = data.len(), model = ?self.model_choice, "model trained");
        Ok(())
    }

    fn evaluate(&self) -> Result<Metrics, PipelineError> {
        let model = self.load_model()?;
        let test = Dataset::from_table(&Table::read(&self.test_path())?, &self.target_column)?;
        let train_rows = Table::read(&self.train_path())?.row_count();
        let metrics = Metrics {
            model: model.as_model().kind(),
            accuracy: model.accuracy(&test)?,
            train_rows,
            test_rows: test.len(),
            evaluated_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&metrics)
            .map_err(|e| PipelineError::serialization(&self.metrics_path, e))?;
        self.store.atomic_write(&self.metrics_path, &body)?;
        tracing::info!(accuracy = metrics.accuracy, test_rows = metrics.test_rows, "model evaluated");
        Ok(metrics)
    }

    /// Load the trained model artifact
    ///
    /// # Errors
    /// Fails if the model file is missing or not a valid model document.
    pub fn load_model(&self) -> Result<TrainedModel, PipelineError> {
        let bytes = fs::read(&self.model_path).map_err(|e| PipelineError::io(&self.model_path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::serialization(&self.model_path, e))
    }

    fn set_status(
        &self,
        stage: Stage,
        status: StageStatus,
        detail: Option<String>,
    ) -> Result<(), PipelineError> {
        let mut state = self.state()?;
        state.set(stage, status, detail);
        state.save(&self.store, &self.state_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::generate_classification;
    use tempfile::TempDir;

    fn setup(rows: usize) -> (TempDir, PipelineRunner) {
        let dir = TempDir::new().unwrap();
        let config = MlopsConfig::for_root(dir.path()).unwrap();
        config.ensure_dirs().unwrap();
        let runner = PipelineRunner::new(&config);
        fs::write(
            runner.raw_dataset_path(),
            generate_classification(rows, 3, 7).to_csv(),
        )
        .unwrap();
        (dir, runner)
    }

    #[test]
    fn full_run_writes_every_output() {
        let (_dir, runner) = setup(100);
        let report = runner.run_all().unwrap();
        assert_eq!(report.stages, Stage::ALL.to_vec());
        for stage in Stage::ALL {
            for output in runner.stage_outputs(stage) {
                assert!(output.is_file(), "{} missing", output.display());
            }
            assert_eq!(runner.state().unwrap().status(stage), StageStatus::Succeeded);
        }
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.test_rows, 20);
        assert_eq!(metrics.train_rows, 80);
        assert!(metrics.accuracy > 0.8);
    }

    #[test]
    fn preprocessing_drops_missing_and_duplicate_rows() {
        let (_dir, runner) = setup(10);
        let mut table = Table::read(runner.raw_dataset_path()).unwrap();
        table.rows_mut()[0][1] = String::new();
        let dup = table.rows()[1].clone();
        table.rows_mut().push(dup);
        fs::write(runner.raw_dataset_path(), table.to_csv()).unwrap();

        let report = runner.run_from(Stage::Preprocessing).unwrap();
        assert_eq!(report.rows_dropped, Some(2));
    }

    #[test]
    fn marked_stage_fails_until_reset() {
        let (_dir, runner) = setup(50);
        runner.run_all().unwrap();

        runner.mark_failed(Stage::Training, "simulated").unwrap();
        let err = runner.run_from(Stage::Training).unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { stage: Stage::Training, .. }));
        assert_eq!(runner.state().unwrap().failed_stages(), vec![Stage::Training]);

        runner.reset_stage(Stage::Training).unwrap();
        assert!(!runner.state().unwrap().any_failed());
        let report = runner.run_from(Stage::Training).unwrap();
        assert_eq!(report.stages, vec![Stage::Training, Stage::Evaluation]);
    }

    #[test]
    fn missing_input_is_reported() {
        let (_dir, runner) = setup(20);
        let err = runner.run_from(Stage::Evaluation).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { stage: Stage::Evaluation, .. }));
    }
}
