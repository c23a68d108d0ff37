//! Post-recovery verification
//!
//! (a) the target exists, (b) its size is within the configured band of the
//! pre-incident size, (c) structured content is sane: CSV keeps its column
//! count and roughly its row count, JSON parses. Pipeline incidents are
//! checked against stage state instead of size.

use crate::error::IncidentError;
use crate::incident::{Incident, IncidentKind};
use mlops_artifact::Table;
use mlops_core::VerificationConfig;
use mlops_pipeline::{PipelineRunner, StageStatus};
use std::fs;
use std::path::Path;

/// Whether `actual` is within `tolerance` (a fraction) of `expected`
#[must_use]
pub fn within_tolerance(expected: u64, actual: u64, tolerance: f64) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let (expected, actual) = (expected as f64, actual as f64);
    (actual - expected).abs() <= expected * tolerance
}

/// Applies post-recovery checks
#[derive(Debug, Clone)]
pub struct Verifier {
    tolerances: VerificationConfig,
    runner: PipelineRunner,
}

impl Verifier {
    /// Verifier with the configured tolerances
    #[must_use]
    pub fn new(tolerances: VerificationConfig, runner: PipelineRunner) -> Self {
        Self { tolerances, runner }
    }

    /// Check that `incident`'s target is usable again
    ///
    /// # Errors
    /// Returns [`IncidentError::VerificationFailed`] naming the first failed check.
    pub fn verify(&self, incident: &Incident) -> Result<(), IncidentError> {
        match incident.kind {
            IncidentKind::PipelineFailure => self.verify_stage(incident),
            IncidentKind::DataCorruption | IncidentKind::ModelDegradation => {
                self.verify_artifact(incident)
            }
        }
    }

    fn verify_artifact(&self, incident: &Incident) -> Result<(), IncidentError> {
        let path = &incident.target_path;
        let fail = |reason: String| IncidentError::VerificationFailed {
            path: path.clone(),
            reason,
        };

        let meta = fs::metadata(path).map_err(|_| fail("artifact does not exist".into()))?;
        if !meta.is_file() {
            return Err(fail("artifact is not a regular file".into()));
        }

        if let Some(pre) = &incident.pre_incident {
            if !within_tolerance(pre.size_bytes, meta.len(), self.tolerances.size_tolerance) {
                return Err(fail(format!(
                    "size {} outside {:.0}% of pre-incident size {}",
                    meta.len(),
                    self.tolerances.size_tolerance * 100.0,
                    pre.size_bytes
                )));
            }
        }

        match extension(path).as_deref() {
            Some("csv") => {
                let table = Table::read(path).map_err(|e| fail(e.to_string()))?;
                table.integrity().map_err(|e| fail(e.to_string()))?;
                let pre = incident.pre_incident.as_ref();
                if let Some(columns) = pre.and_then(|p| p.columns) {
                    if table.column_count() != columns {
                        return Err(fail(format!(
                            "{} columns, expected {columns}",
                            table.column_count()
                        )));
                    }
                }
                if let Some(rows) = pre.and_then(|p| p.rows) {
                    if !within_tolerance(rows as u64, table.row_count() as u64, self.tolerances.row_tolerance) {
                        return Err(fail(format!(
                            "{} rows, expected about {rows}",
                            table.row_count()
                        )));
                    }
                }
            }
            Some("json") => {
                let bytes = fs::read(path).map_err(|e| fail(e.to_string()))?;
                serde_json::from_slice::<serde_json::Value>(&bytes)
                    .map_err(|e| fail(format!("not valid JSON: {e}")))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn verify_stage(&self, incident: &Incident) -> Result<(), IncidentError> {
        let Some(stage) = incident.stage() else {
            return Err(IncidentError::VerificationFailed {
                path: incident.target_path.clone(),
                reason: "pipeline incident without a stage".into(),
            });
        };
        let fail = |reason: String| IncidentError::VerificationFailed {
            path: incident.target_path.clone(),
            reason,
        };

        if self.runner.markers().is_set(stage) {
            return Err(fail(format!("failure marker for {stage} still present")));
        }
        let state = self.runner.state().map_err(|e| fail(e.to_string()))?;
        if state.status(stage) == StageStatus::Failed {
            return Err(fail(format!("{stage} is still marked failed")));
        }
        if let Some(missing) = self
            .runner
            .stage_outputs(stage)
            .into_iter()
            .find(|p| !p.is_file())
        {
            return Err(fail(format!("{stage} output {} is missing", missing.display())));
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tolerance_band_is_inclusive() {
        assert!(within_tolerance(100, 105, 0.05));
        assert!(within_tolerance(100, 95, 0.05));
        assert!(!within_tolerance(100, 106, 0.05));
        assert!(within_tolerance(0, 0, 0.05));
        assert!(!within_tolerance(0, 1, 0.05));
    }

    proptest! {
        #[test]
        fn exact_size_always_passes(size in 0u64..1_000_000, tol in 0.0f64..1.0) {
            prop_assert!(within_tolerance(size, size, tol));
        }

        #[test]
        fn zero_tolerance_requires_exact_size(size in 1u64..1_000_000, delta in 1u64..1000) {
            prop_assert!(!within_tolerance(size, size + delta, 0.0));
        }
    }
}
