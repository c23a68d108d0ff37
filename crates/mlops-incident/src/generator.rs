//! Incident generator
//!
//! Injects realistic, reversible faults. Artifacts are always backed up
//! before they are touched; if the backup fails nothing is mutated.

use crate::error::IncidentError;
use crate::incident::{
    BackupReference, DataCorruption, Incident, IncidentKind, IncidentSubtype, ModelDegradation,
    PreIncidentState,
};
use chrono::Utc;
use mlops_artifact::{ArtifactStore, Table};
use mlops_core::{IncidentConfig, MlopsConfig};
use mlops_pipeline::{PipelineRunner, Stage};
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Bytes written over a model by [`ModelDegradation::Corruption`]
const CORRUPTION_PATTERN: &[u8] = b"CORRUPTED_DATA";
const CORRUPTION_REPEAT: usize = 1000;

/// Creates incidents against the configured workspace
#[derive(Debug)]
pub struct IncidentGenerator {
    settings: IncidentConfig,
    target_column: String,
    root: PathBuf,
    raw_data: PathBuf,
    models: PathBuf,
    store: ArtifactStore,
    runner: PipelineRunner,
    rng: StdRng,
    log: Vec<Incident>,
}

impl IncidentGenerator {
    /// Generator seeded from `incident.seed`, or from entropy when unset
    #[must_use]
    pub fn new(config: &MlopsConfig) -> Self {
        let rng = config
            .incident
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            settings: config.incident.clone(),
            target_column: config.pipeline.target_column.clone(),
            root: config.root().to_path_buf(),
            raw_data: config.paths.raw_data.clone(),
            models: config.paths.models.clone(),
            store: ArtifactStore::new(&config.paths.backups),
            runner: PipelineRunner::new(config),
            rng,
            log: Vec::new(),
        }
    }

    /// Corrupt the CSV dataset at `target`
    ///
    /// A relative `target` is taken from the workspace root.
    ///
    /// # Errors
    /// - [`IncidentError::ArtifactNotFound`] if `target` does not exist
    /// - [`IncidentError::BackupFailed`] if the backup cannot be written
    /// - [`IncidentError::Unsupported`] if the table has nothing to corrupt
    pub fn simulate_data_corruption(
        &mut self,
        target: &Path,
        subtype: DataCorruption,
    ) -> Result<Incident, IncidentError> {
        let target = &self.root.join(target);
        if !target.is_file() {
            return Err(IncidentError::ArtifactNotFound(target.to_path_buf()));
        }
        let mut table = Table::read(target)?;
        if table.row_count() == 0 {
            return Err(IncidentError::Unsupported {
                path: target.to_path_buf(),
                reason: "dataset has no rows".into(),
            });
        }
        let backup = self.backup(target)?;
        let pre_incident = PreIncidentState {
            rows: Some(table.row_count()),
            columns: Some(table.column_count()),
            ..PreIncidentState::from(backup.fingerprint)
        };

        let detail = match subtype {
            DataCorruption::RandomNoise => self.add_noise(target, &mut table)?,
            DataCorruption::MissingValues => self.blank_cells(&mut table),
            DataCorruption::Duplicates => self.duplicate_rows(&mut table),
        };
        self.store.atomic_write(target, table.to_csv().as_bytes())?;

        let incident = self.emit(
            IncidentSubtype::Data(subtype),
            target.to_path_buf(),
            Some(backup.into()),
            Some(pre_incident),
            detail,
        );
        Ok(incident)
    }

    /// Delete or overwrite the model artifact at `target`
    ///
    /// A relative `target` is taken from the workspace root.
    ///
    /// # Errors
    /// - [`IncidentError::ArtifactNotFound`] if `target` does not exist
    /// - [`IncidentError::BackupFailed`] if the backup cannot be written
    pub fn simulate_model_degradation(
        &mut self,
        target: &Path,
        subtype: ModelDegradation,
    ) -> Result<Incident, IncidentError> {
        let target = &self.root.join(target);
        if !target.is_file() {
            return Err(IncidentError::ArtifactNotFound(target.to_path_buf()));
        }
        let backup = self.backup(target)?;
        let pre_incident = PreIncidentState::from(backup.fingerprint);

        let detail = match subtype {
            ModelDegradation::Deletion => {
                ArtifactStore::remove(target)?;
                "model deleted".to_string()
            }
            ModelDegradation::Corruption => {
                let garbage = CORRUPTION_PATTERN.repeat(CORRUPTION_REPEAT);
                self.store.atomic_write(target, &garbage)?;
                format!("model overwritten with {} invalid bytes", garbage.len())
            }
        };

        Ok(self.emit(
            IncidentSubtype::Model(subtype),
            target.to_path_buf(),
            Some(backup.into()),
            Some(pre_incident),
            detail,
        ))
    }

    /// Mark `stage` failed; no artifact is mutated, so no backup is taken
    ///
    /// # Errors
    /// Fails if the marker or stage state cannot be written.
    pub fn simulate_pipeline_failure(&mut self, stage: Stage) -> Result<Incident, IncidentError> {
        let marker = self.runner.mark_failed(stage, "simulated incident")?;
        Ok(self.emit(
            IncidentSubtype::Stage(stage),
            marker,
            None,
            None,
            format!("{stage} marked failed"),
        ))
    }

    /// Inject one of: noise or missing values on a raw dataset, model
    /// deletion, or a preprocessing failure
    ///
    /// Options whose target is absent are skipped; the pipeline failure is
    /// always possible.
    ///
    /// # Errors
    /// Propagates the chosen injection's error.
    pub fn simulate_random_incident(&mut self) -> Result<Incident, IncidentError> {
        let datasets = files_with_extension(&self.raw_data, "csv");
        let models = files_with_extension(&self.models, "json");

        let mut options = vec![IncidentSubtype::Stage(Stage::Preprocessing)];
        if !datasets.is_empty() {
            options.push(IncidentSubtype::Data(DataCorruption::RandomNoise));
            options.push(IncidentSubtype::Data(DataCorruption::MissingValues));
        }
        if !models.is_empty() {
            options.push(IncidentSubtype::Model(ModelDegradation::Deletion));
        }
        let subtype = *options
            .choose(&mut self.rng)
            .ok_or(IncidentError::NoTarget(IncidentKind::PipelineFailure))?;
        tracing::warn!(%subtype, "generating random incident");

        match subtype {
            IncidentSubtype::Data(corruption) => {
                let target = datasets
                    .choose(&mut self.rng)
                    .cloned()
                    .ok_or(IncidentError::NoTarget(IncidentKind::DataCorruption))?;
                self.simulate_data_corruption(&target, corruption)
            }
            IncidentSubtype::Model(degradation) => {
                let target = models
                    .choose(&mut self.rng)
                    .cloned()
                    .ok_or(IncidentError::NoTarget(IncidentKind::ModelDegradation))?;
                self.simulate_model_degradation(&target, degradation)
            }
            IncidentSubtype::Stage(stage) => self.simulate_pipeline_failure(stage),
        }
    }

    /// Incidents emitted by this generator, oldest first
    #[must_use]
    pub fn incident_log(&self) -> &[Incident] {
        &self.log
    }

    /// Forget emitted incidents
    pub fn clear_incident_log(&mut self) {
        self.log.clear();
        tracing::info!("incident log cleared");
    }

    fn backup(&self, target: &Path) -> Result<mlops_artifact::BackupRecord, IncidentError> {
        self.store
            .backup(target)
            .map_err(|source| IncidentError::BackupFailed {
                path: target.to_path_buf(),
                source,
            })
    }

    fn emit(
        &mut self,
        subtype: IncidentSubtype,
        target_path: PathBuf,
        backup_reference: Option<BackupReference>,
        pre_incident: Option<PreIncidentState>,
        detail: String,
    ) -> Incident {
        let incident = Incident {
            incident_id: Ulid::new().to_string(),
            kind: subtype.kind(),
            subtype,
            target_path,
            timestamp: Utc::now(),
            backup_reference,
            pre_incident,
            detail,
        };
        tracing::warn!(
            incident = %incident.incident_id,
            kind = %incident.kind,
            %subtype,
            target = %incident.target_path.display(),
            backup = ?incident.backup_reference.as_ref().map(|b| b.backup_path.display().to_string()),
            detail = %incident.detail,
            "incident injected"
        );
        self.log.push(incident.clone());
        incident
    }

    /// Perturb one numeric feature cell in exactly `ceil(fraction * rows)`
    /// distinct rows by ±uniform(0.1·bound, bound)
    fn add_noise(&mut self, target: &Path, table: &mut Table) -> Result<String, IncidentError> {
        let target_idx = table.column_index(&self.target_column);
        let mut columns: Vec<usize> = table
            .numeric_columns()
            .into_iter()
            .filter(|c| Some(*c) != target_idx)
            .collect();
        if columns.is_empty() {
            columns = table.numeric_columns();
        }
        if columns.is_empty() {
            return Err(IncidentError::Unsupported {
                path: target.to_path_buf(),
                reason: "no numeric columns".into(),
            });
        }

        let rows = table.row_count();
        let count = fraction_of(rows, self.settings.noise_fraction);
        let bound = self.settings.noise_bound;
        let chosen = (0..rows).choose_multiple(&mut self.rng, count);
        for &row in &chosen {
            let col = columns[self.rng.gen_range(0..columns.len())];
            let current = table.numeric(row, col).unwrap_or(0.0);
            let magnitude = self.rng.gen_range(0.1 * bound..=bound);
            let noise = if self.rng.gen_bool(0.5) { magnitude } else { -magnitude };
            table.rows_mut()[row][col] = format!("{:.4}", current + noise);
        }
        Ok(format!("noise added to {} of {rows} rows", chosen.len()))
    }

    fn blank_cells(&mut self, table: &mut Table) -> String {
        let fraction = self.settings.missing_fraction;
        let marker = self.settings.missing_marker.clone();
        let mut blanked = 0usize;
        for row in table.rows_mut() {
            for cell in row.iter_mut() {
                if *cell != marker && self.rng.gen_bool(fraction) {
                    cell.clone_from(&marker);
                    blanked += 1;
                }
            }
        }
        // a positive fraction always leaves a visible fault
        if blanked == 0 && fraction > 0.0 {
            let rows = table.row_count();
            let row = self.rng.gen_range(0..rows);
            let cols = table.rows()[row].len();
            if cols > 0 {
                let col = self.rng.gen_range(0..cols);
                table.rows_mut()[row][col] = marker;
                blanked = 1;
            }
        }
        format!("{blanked} cells replaced with missing marker")
    }

    fn duplicate_rows(&mut self, table: &mut Table) -> String {
        let rows = table.row_count();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let count = ((rows as f64 * self.settings.duplicate_factor).floor() as usize).max(1);
        let copies: Vec<Vec<String>> = (0..count)
            .map(|_| table.rows()[self.rng.gen_range(0..rows)].clone())
            .collect();
        table.rows_mut().extend(copies);
        format!("{count} duplicate rows appended to {rows}")
    }
}

fn fraction_of(rows: usize, fraction: f64) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let count = (rows as f64 * fraction).ceil() as usize;
    count.min(rows)
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlops_test_utils::{read_bytes, TestWorkspace};

    #[test]
    fn missing_target_is_reported_before_any_backup() {
        let ws = TestWorkspace::new();
        let mut generator = IncidentGenerator::new(&ws.config);
        let err = generator
            .simulate_data_corruption(&ws.dataset_path(), DataCorruption::RandomNoise)
            .unwrap_err();
        assert!(matches!(err, IncidentError::ArtifactNotFound(_)));
        assert!(fs::read_dir(&ws.config.paths.backups).unwrap().next().is_none());
    }

    #[test]
    fn backup_holds_pre_incident_bytes() {
        let ws = TestWorkspace::new();
        let path = ws.write_dataset(50, 3);
        let original = read_bytes(&path);
        let mut generator = IncidentGenerator::new(&ws.config);

        let incident = generator
            .simulate_data_corruption(&path, DataCorruption::MissingValues)
            .unwrap();
        let backup = incident.backup_reference.unwrap();
        assert_eq!(read_bytes(&backup.backup_path), original);
        assert_ne!(read_bytes(&path), original);
        let pre = incident.pre_incident.unwrap();
        assert_eq!((pre.rows, pre.columns), (Some(50), Some(4)));
    }

    #[test]
    fn duplicates_inflate_row_count() {
        let ws = TestWorkspace::new();
        let path = ws.write_dataset(100, 3);
        let mut generator = IncidentGenerator::new(&ws.config);
        generator
            .simulate_data_corruption(&path, DataCorruption::Duplicates)
            .unwrap();
        assert_eq!(Table::read(&path).unwrap().row_count(), 130);
    }

    #[test]
    fn model_corruption_overwrites_with_pattern() {
        let ws = TestWorkspace::new();
        let model = ws.write_model("classifier.json", b"{\"kind\":\"majority\"}");
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator
            .simulate_model_degradation(&model, ModelDegradation::Corruption)
            .unwrap();
        let bytes = read_bytes(&model);
        assert_eq!(bytes.len(), 14_000);
        assert!(bytes.starts_with(b"CORRUPTED_DATACORRUPTED_DATA"));
        assert_eq!(incident.kind, IncidentKind::ModelDegradation);
    }

    #[test]
    fn pipeline_failure_writes_marker_without_backup() {
        let ws = TestWorkspace::new();
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator.simulate_pipeline_failure(Stage::Training).unwrap();
        assert!(incident.target_path.is_file());
        assert!(incident.backup_reference.is_none());
        assert_eq!(incident.stage(), Some(Stage::Training));
        assert_eq!(generator.incident_log().len(), 1);
        generator.clear_incident_log();
        assert!(generator.incident_log().is_empty());
    }

    #[test]
    fn random_incident_without_artifacts_fails_the_pipeline() {
        let ws = TestWorkspace::new();
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator.simulate_random_incident().unwrap();
        assert_eq!(incident.kind, IncidentKind::PipelineFailure);
    }

    #[test]
    fn injection_twice_gives_two_backups() {
        let ws = TestWorkspace::new();
        let model = ws.write_model("classifier.json", b"{}");
        let mut generator = IncidentGenerator::new(&ws.config);
        let first = generator
            .simulate_model_degradation(&model, ModelDegradation::Corruption)
            .unwrap();
        let second = generator
            .simulate_model_degradation(&model, ModelDegradation::Corruption)
            .unwrap();
        assert_ne!(first.incident_id, second.incident_id);
        assert_ne!(
            first.backup_reference.unwrap().backup_path,
            second.backup_reference.unwrap().backup_path
        );
    }
}
