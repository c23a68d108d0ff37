//! Recovery coordinator
//!
//! Tries the strategy chain for an incident's kind in order, verifying after
//! each attempt and stopping at the first verified success. One recovery per
//! target at a time.

use crate::audit::{AuditEntry, AuditLog, Severity};
use crate::error::IncidentError;
use crate::incident::{Incident, IncidentKind};
use crate::strategy::RecoveryStrategy;
use crate::verify::Verifier;
use chrono::{DateTime, Utc};
use mlops_artifact::ArtifactStore;
use mlops_core::MlopsConfig;
use mlops_pipeline::{PipelineRunner, StageStatus};
use mlops_versioning::{RestoreScope, VersionController, VersioningError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Terminal state of a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// A strategy restored the target and verification passed
    Recovered,
    /// Nothing to do; the target already matched its pre-incident state
    AlreadyRecovered,
    /// Every strategy failed; needs manual intervention
    Exhausted,
}

/// One strategy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    /// Strategy that was applied
    pub strategy: RecoveryStrategy,
    /// When the strategy started
    pub started_at: DateTime<Utc>,
    /// When apply and verify finished
    pub finished_at: DateTime<Utc>,
    /// Whether verification passed after applying
    pub verification_passed: bool,
    /// Apply or verification error, if any
    pub error: Option<String>,
}

/// Outcome of `recover_from_incident`
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    /// Incident this result belongs to
    pub incident_id: String,
    /// `None` when exhausted
    pub strategy_used: Option<RecoveryStrategy>,
    /// Whether the target is healthy again
    pub success: bool,
    /// Whether the final state passed verification
    pub verification_passed: bool,
    /// Wall time of the whole recovery
    pub duration: Duration,
    /// One line per step, in order
    pub detail_log: Vec<String>,
    /// Every strategy tried, in chain order
    pub attempts: Vec<StrategyAttempt>,
    /// Terminal state
    pub outcome: RecoveryOutcome,
}

impl RecoveryResult {
    /// Turn exhaustion into [`IncidentError::RecoveryExhausted`]
    ///
    /// # Errors
    /// Returns `RecoveryExhausted` when no strategy succeeded.
    pub fn into_result(self) -> Result<Self, IncidentError> {
        if self.outcome == RecoveryOutcome::Exhausted {
            Err(IncidentError::RecoveryExhausted {
                incident_id: self.incident_id,
                attempts: self.attempts.len(),
            })
        } else {
            Ok(self)
        }
    }
}

/// Marks a target as being recovered; released on drop
struct InFlightGuard<'a> {
    targets: &'a Mutex<HashSet<PathBuf>>,
    target: PathBuf,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(targets: &'a Mutex<HashSet<PathBuf>>, target: &Path) -> Result<Self, IncidentError> {
        if !targets.lock().insert(target.to_path_buf()) {
            return Err(IncidentError::RecoveryInProgress(target.to_path_buf()));
        }
        Ok(Self {
            targets,
            target: target.to_path_buf(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.targets.lock().remove(&self.target);
    }
}

/// Drives recovery of injected incidents
#[derive(Debug)]
pub struct RecoveryCoordinator {
    store: ArtifactStore,
    versioning: VersionController,
    runner: PipelineRunner,
    verifier: Verifier,
    audit: AuditLog,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl RecoveryCoordinator {
    /// Coordinator over an explicit version controller
    ///
    /// # Errors
    /// Fails if the audit log cannot be opened.
    pub fn new(config: &MlopsConfig, versioning: VersionController) -> Result<Self, IncidentError> {
        let runner = PipelineRunner::new(config);
        Ok(Self {
            store: ArtifactStore::new(&config.paths.backups),
            versioning,
            verifier: Verifier::new(config.verification, runner.clone()),
            runner,
            audit: AuditLog::open(config.audit_log_path(), &config.audit)?,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Coordinator over the configured remote, registry and snapshots
    ///
    /// # Errors
    /// Fails if the version controller or audit log cannot be set up.
    pub fn from_config(config: &MlopsConfig) -> Result<Self, IncidentError> {
        let versioning = VersionController::from_config(config)?;
        Self::new(config, versioning)
    }

    /// Audit log written by recoveries
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Version controller used by the remote, snapshot and registry tiers
    #[must_use]
    pub fn versioning(&self) -> &VersionController {
        &self.versioning
    }

    /// Restore the system after `incident`
    ///
    /// Strategy failures are absorbed; exhaustion is reported as
    /// `success = false` with [`RecoveryOutcome::Exhausted`] and a CRITICAL
    /// audit entry. Re-running on a recovered incident is a no-op success.
    ///
    /// # Errors
    /// - [`IncidentError::RecoveryInProgress`] if the target is already being recovered
    /// - [`IncidentError::Audit`] if the CRITICAL exhaustion entry cannot be written
    ///
    /// Other audit writes never change the outcome of a restore; a failed
    /// write is logged as a warning and noted in `detail_log`.
    pub fn recover_from_incident(&self, incident: &Incident) -> Result<RecoveryResult, IncidentError> {
        let resolved;
        let incident = if incident.target_path.is_relative() {
            resolved = Incident {
                target_path: self.versioning.resolve(&incident.target_path),
                ..incident.clone()
            };
            &resolved
        } else {
            incident
        };
        let _guard = InFlightGuard::acquire(&self.in_flight, &incident.target_path)?;
        let span = tracing::info_span!(
            "recovery",
            incident = %incident.incident_id,
            kind = %incident.kind,
        );
        let _enter = span.enter();
        let started = Instant::now();
        let id = incident.incident_id.as_str();

        let mut detail_log = Vec::new();
        self.record(
            AuditEntry::new(Severity::Info, "recovery_started")
                .with_incident(id)
                .with_detail(format!(
                    "{} on {}",
                    incident.subtype,
                    incident.target_path.display()
                )),
            &mut detail_log,
        );

        if self.already_recovered(incident) && self.verifier.verify(incident).is_ok() {
            detail_log.push("target already matches its pre-incident state".to_string());
            self.record(
                AuditEntry::new(Severity::Info, "already_recovered")
                    .with_incident(id)
                    .with_strategy(RecoveryStrategy::AlreadyRecovered)
                    .with_verification(true),
                &mut detail_log,
            );
            return Ok(RecoveryResult {
                incident_id: id.to_string(),
                strategy_used: Some(RecoveryStrategy::AlreadyRecovered),
                success: true,
                verification_passed: true,
                duration: started.elapsed(),
                detail_log,
                attempts: Vec::new(),
                outcome: RecoveryOutcome::AlreadyRecovered,
            });
        }

        let chain = RecoveryStrategy::chain(incident.kind);
        let mut attempts = Vec::with_capacity(chain.len());
        for &strategy in chain {
            let started_at = Utc::now();
            let outcome = self
                .apply(strategy, incident)
                .and_then(|()| self.verifier.verify(incident));
            let finished_at = Utc::now();

            let entry = AuditEntry::new(Severity::Info, "strategy_attempt")
                .with_incident(id)
                .with_strategy(strategy)
                .with_window(started_at, finished_at);
            match outcome {
                Ok(()) => {
                    detail_log.push(format!("{strategy}: restored and verified"));
                    self.record(
                        AuditEntry {
                            event: "strategy_succeeded".into(),
                            ..entry
                        }
                        .with_verification(true),
                        &mut detail_log,
                    );
                    attempts.push(StrategyAttempt {
                        strategy,
                        started_at,
                        finished_at,
                        verification_passed: true,
                        error: None,
                    });
                    tracing::info!(%strategy, attempts = attempts.len(), "recovery succeeded");
                    return Ok(RecoveryResult {
                        incident_id: id.to_string(),
                        strategy_used: Some(strategy),
                        success: true,
                        verification_passed: true,
                        duration: started.elapsed(),
                        detail_log,
                        attempts,
                        outcome: RecoveryOutcome::Recovered,
                    });
                }
                Err(e) => {
                    detail_log.push(format!("{strategy}: {e}"));
                    self.record(
                        AuditEntry {
                            severity: Severity::Warning,
                            event: "strategy_failed".into(),
                            ..entry
                        }
                        .with_verification(false)
                        .with_detail(e.to_string()),
                        &mut detail_log,
                    );
                    attempts.push(StrategyAttempt {
                        strategy,
                        started_at,
                        finished_at,
                        verification_passed: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.audit.append(
            AuditEntry::new(Severity::Critical, "recovery_exhausted")
                .with_incident(id)
                .with_detail(format!(
                    "all {} strategies failed for {}; manual intervention required",
                    attempts.len(),
                    incident.target_path.display()
                )),
        )?;
        Ok(RecoveryResult {
            incident_id: id.to_string(),
            strategy_used: None,
            success: false,
            verification_passed: false,
            duration: started.elapsed(),
            detail_log,
            attempts,
            outcome: RecoveryOutcome::Exhausted,
        })
    }

    /// Append to the audit log; a write failure is kept out of the outcome
    fn record(&self, entry: AuditEntry, detail_log: &mut Vec<String>) {
        let event = entry.event.clone();
        if let Err(e) = self.audit.append(entry) {
            tracing::warn!(%event, error = %e, "audit entry not written");
            detail_log.push(format!("audit entry {event} not written: {e}"));
        }
    }

    fn already_recovered(&self, incident: &Incident) -> bool {
        match incident.kind {
            IncidentKind::DataCorruption | IncidentKind::ModelDegradation => {
                let expected = incident
                    .backup_reference
                    .as_ref()
                    .map(|b| b.content_hash)
                    .or_else(|| incident.pre_incident.as_ref().map(|p| p.content_hash));
                expected.is_some_and(|hash| ArtifactStore::matches(&incident.target_path, &hash))
            }
            IncidentKind::PipelineFailure => incident.stage().is_some_and(|stage| {
                !self.runner.markers().is_set(stage)
                    && self
                        .runner
                        .state()
                        .is_ok_and(|s| s.status(stage) != StageStatus::Failed)
            }),
        }
    }

    fn apply(&self, strategy: RecoveryStrategy, incident: &Incident) -> Result<(), IncidentError> {
        let target = incident.target_path.as_path();
        match strategy {
            RecoveryStrategy::LocalBackup => {
                let backup = incident
                    .backup_reference
                    .as_ref()
                    .ok_or_else(|| IncidentError::unavailable(strategy, "no backup recorded"))?;
                if !ArtifactStore::matches(&backup.backup_path, &backup.content_hash) {
                    return Err(IncidentError::unavailable(
                        strategy,
                        format!("backup {} is missing or altered", backup.backup_path.display()),
                    ));
                }
                self.store.atomic_copy(&backup.backup_path, target)?;
            }
            RecoveryStrategy::RemoteStore => {
                let remote = self.versioning.remote();
                if !remote.is_available() {
                    return Err(IncidentError::unavailable(strategy, "remote store is unreachable"));
                }
                // prefer the exact pre-incident revision, else whatever is tracked
                let exact = incident
                    .pre_incident
                    .as_ref()
                    .map(|pre| remote.pull(&pre.content_hash, target));
                match exact {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "pre-incident revision not in remote");
                        remote.checkout(target)?;
                    }
                    None => {
                        remote.checkout(target)?;
                    }
                }
            }
            RecoveryStrategy::SnapshotData => {
                let snapshot = self
                    .versioning
                    .latest_snapshot()?
                    .ok_or_else(|| IncidentError::unavailable(strategy, "no snapshots recorded"))?;
                let key = self.versioning.key_for(target);
                if snapshot.revision_of(&key).is_none() {
                    return Err(IncidentError::unavailable(
                        strategy,
                        format!("snapshot {} does not record {}", snapshot.version_tag, key.display()),
                    ));
                }
                if !self
                    .versioning
                    .restore_snapshot(&snapshot.version_tag, RestoreScope::data_only())?
                {
                    return Err(IncidentError::unavailable(
                        strategy,
                        format!("snapshot {} restored partially", snapshot.version_tag),
                    ));
                }
            }
            RecoveryStrategy::RegistryProduction => {
                let registry = self.versioning.registry();
                let version = match registry.production_for_path(target) {
                    Ok(Some(version)) => version,
                    Ok(None) => {
                        return Err(IncidentError::unavailable(strategy, "no production model registered"))
                    }
                    Err(VersioningError::RegistryUnavailable(root)) => {
                        return Err(IncidentError::unavailable(
                            strategy,
                            format!("registry missing at {}", root.display()),
                        ))
                    }
                    Err(e) => return Err(e.into()),
                };
                registry.restore(&version, target)?;
            }
            RecoveryStrategy::ResetStage => {
                let stage = stage_of(strategy, incident)?;
                self.runner.reset_stage(stage)?;
            }
            RecoveryStrategy::RerunFromStage => {
                let stage = stage_of(strategy, incident)?;
                self.runner.run_from(stage)?;
            }
            RecoveryStrategy::AlreadyRecovered => {}
        }
        Ok(())
    }
}

fn stage_of(
    strategy: RecoveryStrategy,
    incident: &Incident,
) -> Result<mlops_pipeline::Stage, IncidentError> {
    incident
        .stage()
        .ok_or_else(|| IncidentError::unavailable(strategy, "incident has no pipeline stage"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::IncidentGenerator;
    use crate::incident::{DataCorruption, ModelDegradation};
    use mlops_pipeline::Stage;
    use mlops_test_utils::{read_bytes, TestWorkspace};

    fn coordinator(ws: &TestWorkspace) -> RecoveryCoordinator {
        RecoveryCoordinator::from_config(&ws.config).unwrap()
    }

    #[test]
    fn in_flight_guard_rejects_second_recovery_of_same_target() {
        let targets = Mutex::new(HashSet::new());
        let path = Path::new("data/raw/customer_data.csv");
        let guard = InFlightGuard::acquire(&targets, path).unwrap();
        assert!(matches!(
            InFlightGuard::acquire(&targets, path),
            Err(IncidentError::RecoveryInProgress(_))
        ));
        drop(guard);
        assert!(InFlightGuard::acquire(&targets, path).is_ok());
    }

    #[test]
    fn data_corruption_recovers_from_local_backup() {
        let ws = TestWorkspace::new();
        let path = ws.write_dataset(100, 3);
        let original = read_bytes(&path);
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator
            .simulate_data_corruption(&path, DataCorruption::Duplicates)
            .unwrap();

        let result = coordinator(&ws).recover_from_incident(&incident).unwrap();
        assert!(result.success && result.verification_passed);
        assert_eq!(result.strategy_used, Some(RecoveryStrategy::LocalBackup));
        assert_eq!(result.outcome, RecoveryOutcome::Recovered);
        assert_eq!(read_bytes(&path), original);
    }

    #[test]
    fn remote_is_used_when_backup_is_gone() {
        let ws = TestWorkspace::new();
        let path = ws.write_dataset(40, 3);
        let original = read_bytes(&path);
        let coordinator = coordinator(&ws);
        coordinator.versioning().remote().push(&path).unwrap();

        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator
            .simulate_data_corruption(&path, DataCorruption::MissingValues)
            .unwrap();
        std::fs::remove_file(&incident.backup_reference.as_ref().unwrap().backup_path).unwrap();

        let result = coordinator.recover_from_incident(&incident).unwrap();
        assert_eq!(result.strategy_used, Some(RecoveryStrategy::RemoteStore));
        assert_eq!(result.attempts.len(), 2);
        assert!(!result.attempts[0].verification_passed);
        assert_eq!(read_bytes(&path), original);
    }

    #[test]
    fn corrupted_model_fails_verification_until_restored() {
        let ws = TestWorkspace::new();
        ws.train_pipeline();
        let model = ws.runner().model_path().to_path_buf();
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator
            .simulate_model_degradation(&model, ModelDegradation::Corruption)
            .unwrap();
        assert!(ws.runner().load_model().is_err());

        let result = coordinator(&ws).recover_from_incident(&incident).unwrap();
        assert!(result.success);
        assert!(ws.runner().load_model().is_ok());
    }

    #[test]
    fn pipeline_failure_is_reset() {
        let ws = TestWorkspace::new();
        ws.train_pipeline();
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator.simulate_pipeline_failure(Stage::Evaluation).unwrap();

        let result = coordinator(&ws).recover_from_incident(&incident).unwrap();
        assert_eq!(result.strategy_used, Some(RecoveryStrategy::ResetStage));
        assert!(!incident.target_path.exists());
    }

    #[test]
    fn pipeline_failure_before_any_run_falls_back_to_rerun() {
        let ws = TestWorkspace::new();
        ws.write_dataset(60, 3);
        let mut generator = IncidentGenerator::new(&ws.config);
        let incident = generator.simulate_pipeline_failure(Stage::Preprocessing).unwrap();

        let result = coordinator(&ws).recover_from_incident(&incident).unwrap();
        assert_eq!(result.strategy_used, Some(RecoveryStrategy::RerunFromStage));
        for stage in Stage::ALL {
            assert_eq!(ws.runner().state().unwrap().status(stage), StageStatus::Succeeded);
        }
    }

    #[test]
    fn exhausted_result_converts_to_error() {
        let result = RecoveryResult {
            incident_id: "x".into(),
            strategy_used: None,
            success: false,
            verification_passed: false,
            duration: Duration::ZERO,
            detail_log: Vec::new(),
            attempts: Vec::new(),
            outcome: RecoveryOutcome::Exhausted,
        };
        assert!(matches!(
            result.into_result(),
            Err(IncidentError::RecoveryExhausted { attempts: 0, .. })
        ));
    }
}
