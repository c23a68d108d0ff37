//! Command bodies
//!
//! Each command returns an [`Exit`] for expected outcomes and reserves `Err`
//! for infrastructure failures.

use crate::{Console, Exit};
use chrono::Utc;
use clap::ArgMatches;
use mlops_artifact::ArtifactStore;
use mlops_core::MlopsConfig;
use mlops_incident::{
    AuditLog, DataCorruption, IncidentError, IncidentGenerator, IncidentKind, IncidentSubtype,
    ModelDegradation, RecoveryCoordinator, RecoveryOutcome, RecoveryResult,
};
use mlops_pipeline::{generate_classification, PipelineError, PipelineReport, PipelineRunner, Stage};
use mlops_versioning::{ModelStage, VersionController, VersioningError};
use std::path::PathBuf;

/// What the user asked `simulate` to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injection {
    Subtype(IncidentSubtype),
    Random,
}

/// Answer to an interactive menu
#[derive(Debug, PartialEq, Eq)]
enum Choice<T> {
    Picked(T),
    Quit,
    Invalid(String),
}

const MENU: [(&str, Injection); 6] = [
    (
        "Data corruption: random noise",
        Injection::Subtype(IncidentSubtype::Data(DataCorruption::RandomNoise)),
    ),
    (
        "Data corruption: missing values",
        Injection::Subtype(IncidentSubtype::Data(DataCorruption::MissingValues)),
    ),
    (
        "Data corruption: duplicate rows",
        Injection::Subtype(IncidentSubtype::Data(DataCorruption::Duplicates)),
    ),
    (
        "Model degradation: deletion",
        Injection::Subtype(IncidentSubtype::Model(ModelDegradation::Deletion)),
    ),
    (
        "Model degradation: corruption",
        Injection::Subtype(IncidentSubtype::Model(ModelDegradation::Corruption)),
    ),
    (
        "Pipeline failure",
        Injection::Subtype(IncidentSubtype::Stage(Stage::Preprocessing)),
    ),
];

fn default_subtype(kind: IncidentKind) -> IncidentSubtype {
    match kind {
        IncidentKind::DataCorruption => IncidentSubtype::Data(DataCorruption::RandomNoise),
        IncidentKind::ModelDegradation => IncidentSubtype::Model(ModelDegradation::Deletion),
        IncidentKind::PipelineFailure => IncidentSubtype::Stage(Stage::Preprocessing),
    }
}

/// Resolve `--kind`/`--subtype`; `Ok(None)` means neither was given
fn injection_from_args(
    kind: Option<&str>,
    subtype: Option<&str>,
) -> Result<Option<Injection>, String> {
    let kind = match kind {
        None => None,
        Some("random") => return Ok(Some(Injection::Random)),
        Some("data") => Some(IncidentKind::DataCorruption),
        Some("model") => Some(IncidentKind::ModelDegradation),
        Some("pipeline") => Some(IncidentKind::PipelineFailure),
        Some(other) => return Err(format!("unknown incident kind: {other}")),
    };
    let subtype = subtype
        .map(str::parse::<IncidentSubtype>)
        .transpose()
        .map_err(|e| e.to_string())?;

    match (kind, subtype) {
        (None, None) => Ok(None),
        (Some(kind), None) => Ok(Some(Injection::Subtype(default_subtype(kind)))),
        (None, Some(subtype)) => Ok(Some(Injection::Subtype(subtype))),
        (Some(kind), Some(subtype)) if subtype.kind() == kind => {
            Ok(Some(Injection::Subtype(subtype)))
        }
        (Some(kind), Some(subtype)) => Err(format!("subtype {subtype} does not apply to {kind}")),
    }
}

fn choose_injection(console: &mut Console<'_>) -> anyhow::Result<Choice<Injection>> {
    console.line("Select incident to simulate:")?;
    for (i, (label, _)) in MENU.iter().enumerate() {
        console.line(format!("  {}. {label}", i + 1))?;
    }
    console.line(format!("  {}. Random incident", MENU.len() + 1))?;

    let Some(answer) = console.prompt("Enter choice (or 'q' to quit): ")? else {
        return Ok(Choice::Quit);
    };
    if answer.eq_ignore_ascii_case("q") {
        return Ok(Choice::Quit);
    }
    let index = match answer.parse::<usize>() {
        Ok(n) if (1..=MENU.len() + 1).contains(&n) => n - 1,
        _ => return Ok(Choice::Invalid(format!("Invalid choice: {answer}"))),
    };
    match MENU.get(index) {
        None => Ok(Choice::Picked(Injection::Random)),
        Some((_, Injection::Subtype(IncidentSubtype::Stage(_)))) => choose_stage(console),
        Some((_, injection)) => Ok(Choice::Picked(*injection)),
    }
}

fn choose_stage(console: &mut Console<'_>) -> anyhow::Result<Choice<Injection>> {
    let answer = console
        .prompt("Stage to fail (preprocessing/training/evaluation) [preprocessing]: ")?
        .unwrap_or_default();
    if answer.is_empty() {
        return Ok(Choice::Picked(Injection::Subtype(IncidentSubtype::Stage(
            Stage::Preprocessing,
        ))));
    }
    Ok(match answer.parse::<Stage>() {
        Ok(stage) => Choice::Picked(Injection::Subtype(IncidentSubtype::Stage(stage))),
        Err(err) => Choice::Invalid(err.to_string()),
    })
}

fn pre_incident_snapshot(
    versioning: &VersionController,
    console: &mut Console<'_>,
) -> anyhow::Result<()> {
    let tag = format!("pre-incident-{}", Utc::now().format("%Y%m%dT%H%M%S%3f"));
    match versioning.create_snapshot(&tag, "taken before incident simulation", true, true) {
        Ok(snapshot) => console.line(format!(
            "Snapshot {} recorded ({} artifacts)",
            snapshot.version_tag,
            snapshot.artifact_count()
        ))?,
        Err(err) => {
            tracing::warn!(error = %err, "pre-incident snapshot skipped");
            console.line(format!("Snapshot skipped: {err}"))?;
        }
    }
    Ok(())
}

fn report_recovery(result: &RecoveryResult, console: &mut Console<'_>) -> anyhow::Result<()> {
    let headline = match result.outcome {
        RecoveryOutcome::Recovered => "Recovery succeeded",
        RecoveryOutcome::AlreadyRecovered => "Target already healthy",
        RecoveryOutcome::Exhausted => "Recovery failed: manual intervention required",
    };
    console.line(format!("{headline} (incident {})", result.incident_id))?;
    if let Some(strategy) = result.strategy_used {
        console.line(format!("  strategy:     {strategy}"))?;
    }
    console.line(format!(
        "  verification: {}",
        if result.verification_passed { "passed" } else { "failed" }
    ))?;
    console.line(format!("  duration:     {:.2?}", result.duration))?;
    for attempt in &result.attempts {
        let status = match (&attempt.error, attempt.verification_passed) {
            (Some(err), _) => format!("error: {err}"),
            (None, true) => "verified".to_string(),
            (None, false) => "verification failed".to_string(),
        };
        console.line(format!("  - {}: {status}", attempt.strategy))?;
    }
    Ok(())
}

/// `simulate`: inject an incident, then let the coordinator recover it
pub(crate) fn simulate(
    config: &MlopsConfig,
    args: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    let kind = args.get_one::<String>("kind").map(String::as_str);
    let subtype = args.get_one::<String>("subtype").map(String::as_str);
    let injection = match injection_from_args(kind, subtype) {
        Ok(Some(injection)) => injection,
        Ok(None) => match choose_injection(console)? {
            Choice::Picked(injection) => injection,
            Choice::Quit => {
                console.line("Simulation cancelled")?;
                return Ok(Exit::Success);
            }
            Choice::Invalid(message) => {
                console.line(message)?;
                return Ok(Exit::Usage);
            }
        },
        Err(message) => {
            console.line(message)?;
            return Ok(Exit::Usage);
        }
    };

    let coordinator = RecoveryCoordinator::from_config(config)?;
    if !args.get_flag("no-snapshot") {
        pre_incident_snapshot(coordinator.versioning(), console)?;
    }

    let runner = PipelineRunner::new(config);
    let target = args.get_one::<PathBuf>("target").cloned();
    let mut generator = IncidentGenerator::new(config);
    let injected = match injection {
        Injection::Random => generator.simulate_random_incident(),
        Injection::Subtype(IncidentSubtype::Data(corruption)) => {
            let target = target.unwrap_or_else(|| runner.raw_dataset_path().to_path_buf());
            generator.simulate_data_corruption(&target, corruption)
        }
        Injection::Subtype(IncidentSubtype::Model(degradation)) => {
            let target = target.unwrap_or_else(|| runner.model_path().to_path_buf());
            generator.simulate_model_degradation(&target, degradation)
        }
        Injection::Subtype(IncidentSubtype::Stage(stage)) => {
            generator.simulate_pipeline_failure(stage)
        }
    };
    let incident = match injected {
        Ok(incident) => incident,
        Err(
            err @ (IncidentError::ArtifactNotFound(_)
            | IncidentError::NoTarget(_)
            | IncidentError::Unsupported { .. }),
        ) => {
            console.line(format!("Cannot inject incident: {err}"))?;
            console.line("Run `mlops pipeline init` to create the dataset and model")?;
            return Ok(Exit::Usage);
        }
        Err(err) => return Err(err.into()),
    };
    console.line(format!("Incident injected: {incident}"))?;
    if !incident.detail.is_empty() {
        console.line(format!("  {}", incident.detail))?;
    }

    match coordinator.recover_from_incident(&incident) {
        Ok(result) => {
            report_recovery(&result, console)?;
            Ok(if result.success {
                Exit::Success
            } else {
                Exit::Unrecoverable
            })
        }
        Err(err) if err.is_unrecoverable() => {
            console.line(format!("Recovery failed: {err}"))?;
            Ok(Exit::Unrecoverable)
        }
        Err(err) => Err(err.into()),
    }
}

/// `rollback`: restore a snapshot chosen by tag or from the list
pub(crate) fn rollback(
    config: &MlopsConfig,
    args: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    let versioning = VersionController::from_config(config)?;
    let tag = match args.get_one::<String>("tag") {
        Some(tag) => tag.clone(),
        None => {
            let snapshots = versioning.list_snapshots()?;
            if snapshots.is_empty() {
                console.line("No snapshots found")?;
                return Ok(Exit::Usage);
            }
            console.line("Available snapshots:")?;
            for (i, snapshot) in snapshots.iter().enumerate() {
                console.line(format!(
                    "{}. {}  {}  {}  code {}",
                    i + 1,
                    snapshot.version_tag,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    snapshot.description,
                    snapshot.code_revision_id.chars().take(8).collect::<String>()
                ))?;
            }
            let answer = console
                .prompt("Enter snapshot number to rollback (or 'q' to quit): ")?
                .unwrap_or_else(|| "q".to_string());
            if answer.eq_ignore_ascii_case("q") {
                console.line("Rollback cancelled")?;
                return Ok(Exit::Success);
            }
            match answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| snapshots.get(i))
            {
                Some(snapshot) => snapshot.version_tag.clone(),
                None => {
                    console.line(format!("Invalid snapshot number: {answer}"))?;
                    return Ok(Exit::Usage);
                }
            }
        }
    };

    console.line(format!("Rolling back to {tag}"))?;
    match versioning.rollback_to(&tag) {
        Ok(true) => {
            console.line("Rollback completed")?;
            Ok(Exit::Success)
        }
        Ok(false) => {
            console.line("Rollback incomplete: some artifacts could not be restored")?;
            Ok(Exit::Unrecoverable)
        }
        Err(err @ VersioningError::SnapshotNotFound(_)) => {
            console.line(err.to_string())?;
            Ok(Exit::Usage)
        }
        Err(err) => Err(err.into()),
    }
}

/// `snapshot create`
pub(crate) fn snapshot_create(
    config: &MlopsConfig,
    args: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    let tag = args.get_one::<String>("tag").map_or("", String::as_str);
    let description = args.get_one::<String>("description").map_or("", String::as_str);
    let versioning = VersionController::from_config(config)?;
    match versioning.create_snapshot(
        tag,
        description,
        !args.get_flag("no-data"),
        !args.get_flag("no-models"),
    ) {
        Ok(snapshot) => {
            console.line(format!(
                "Created snapshot {} ({} data, {} models, code {})",
                snapshot.version_tag,
                snapshot.data_revision_ids.len(),
                snapshot.model_revision_ids.len(),
                snapshot.code_revision_id
            ))?;
            Ok(Exit::Success)
        }
        Err(err @ (VersioningError::DuplicateTag(_) | VersioningError::InvalidTag { .. })) => {
            console.line(err.to_string())?;
            Ok(Exit::Usage)
        }
        Err(err) => Err(err.into()),
    }
}

/// `snapshot list`: snapshots plus the working state against the latest one
pub(crate) fn snapshot_list(config: &MlopsConfig, console: &mut Console<'_>) -> anyhow::Result<Exit> {
    let versioning = VersionController::from_config(config)?;
    let snapshots = versioning.list_snapshots()?;
    if snapshots.is_empty() {
        console.line("No snapshots found")?;
    }
    for snapshot in &snapshots {
        console.line(format!(
            "{:<32} {}  {:>3} artifacts  {}",
            snapshot.version_tag,
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.artifact_count(),
            snapshot.description
        ))?;
    }

    let info = versioning.current_version()?;
    console.line(format!(
        "Code revision: {}",
        info.code_revision.as_deref().unwrap_or("unknown")
    ))?;
    console.line(format!("Tracked artifacts: {}", info.tracked))?;
    if info.is_clean() {
        console.line("Working state matches the latest snapshot")?;
    } else {
        for path in &info.modified {
            console.line(format!("  modified: {}", path.display()))?;
        }
    }
    Ok(Exit::Success)
}

fn report_pipeline(report: &PipelineReport, console: &mut Console<'_>) -> anyhow::Result<()> {
    let stages: Vec<&str> = report.stages.iter().copied().map(Stage::as_str).collect();
    console.line(format!("Stages run: {}", stages.join(", ")))?;
    if let Some(dropped) = report.rows_dropped {
        console.line(format!("Rows dropped during cleaning: {dropped}"))?;
    }
    if let Some(metrics) = &report.metrics {
        console.line(format!(
            "Accuracy: {:.3} (train {}, test {})",
            metrics.accuracy, metrics.train_rows, metrics.test_rows
        ))?;
    }
    Ok(())
}

/// `pipeline init`: synthetic dataset, full run, tracked artifacts, production model
pub(crate) fn pipeline_init(
    config: &MlopsConfig,
    args: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    let rows = args.get_one::<usize>("rows").copied().unwrap_or(500);
    let features = args.get_one::<usize>("features").copied().unwrap_or(4);
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);
    if rows < 2 || features == 0 {
        console.line("Need at least 2 rows and 1 feature")?;
        return Ok(Exit::Usage);
    }

    let runner = PipelineRunner::new(config);
    let table = generate_classification(rows, features, seed);
    ArtifactStore::new(&config.paths.backups)
        .atomic_write(runner.raw_dataset_path(), table.to_csv().as_bytes())?;
    console.line(format!(
        "Generated {rows} rows x {features} features at {}",
        runner.raw_dataset_path().display()
    ))?;

    let report = match runner.run_all() {
        Ok(report) => report,
        Err(err @ PipelineError::StageFailed { .. }) => {
            console.line(err.to_string())?;
            return Ok(Exit::Unrecoverable);
        }
        Err(err) => return Err(err.into()),
    };
    report_pipeline(&report, console)?;

    let versioning = VersionController::from_config(config)?;
    let tracked = [
        runner.raw_dataset_path().to_path_buf(),
        runner.train_path(),
        runner.test_path(),
        runner.model_path().to_path_buf(),
    ];
    for path in &tracked {
        versioning.remote().push(path)?;
    }
    console.line(format!("Tracked {} artifacts in the remote store", tracked.len()))?;

    let registry = versioning.registry();
    let version = registry.register(&config.pipeline.model_name, runner.model_path(), None)?;
    registry.transition(&version.name, version.version, ModelStage::Production)?;
    console.line(format!(
        "Registered {} v{} ({}) as production",
        version.name,
        version.version,
        version.content_hash.short()
    ))?;
    Ok(Exit::Success)
}

/// `pipeline run [--from STAGE]`
pub(crate) fn pipeline_run(
    config: &MlopsConfig,
    args: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    let from = match args.get_one::<String>("from").map(|s| s.parse::<Stage>()) {
        None => Stage::Preprocessing,
        Some(Ok(stage)) => stage,
        Some(Err(err)) => {
            console.line(err.to_string())?;
            return Ok(Exit::Usage);
        }
    };

    let runner = PipelineRunner::new(config);
    match runner.run_from(from) {
        Ok(report) => {
            report_pipeline(&report, console)?;
            Ok(Exit::Success)
        }
        Err(err @ (PipelineError::StageFailed { .. } | PipelineError::MissingInput { .. })) => {
            console.line(err.to_string())?;
            Ok(Exit::Unrecoverable)
        }
        Err(err) => Err(err.into()),
    }
}

/// `audit verify`
pub(crate) fn audit_verify(config: &MlopsConfig, console: &mut Console<'_>) -> anyhow::Result<Exit> {
    let checked = AuditLog::open(config.audit_log_path(), &config.audit)
        .and_then(|log| log.verify_integrity());
    match checked {
        Ok(entries) => {
            console.line(format!("Audit log intact: {entries} entries verified"))?;
            Ok(Exit::Success)
        }
        Err(err @ IncidentError::Audit { .. }) => {
            console.line(format!("Audit log integrity check failed: {err}"))?;
            Ok(Exit::Unrecoverable)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn data(corruption: DataCorruption) -> Option<Injection> {
        Some(Injection::Subtype(IncidentSubtype::Data(corruption)))
    }

    #[test]
    fn neither_flag_means_prompt() {
        assert_eq!(injection_from_args(None, None), Ok(None));
    }

    #[test]
    fn kind_alone_uses_default_subtype() {
        assert_eq!(
            injection_from_args(Some("data"), None),
            Ok(data(DataCorruption::RandomNoise))
        );
        assert_eq!(
            injection_from_args(Some("pipeline"), None),
            Ok(Some(Injection::Subtype(IncidentSubtype::Stage(
                Stage::Preprocessing
            ))))
        );
        assert_eq!(injection_from_args(Some("random"), Some("noise")), Ok(Some(Injection::Random)));
    }

    #[test]
    fn subtype_alone_implies_kind() {
        assert_eq!(
            injection_from_args(None, Some("duplicates")),
            Ok(data(DataCorruption::Duplicates))
        );
        assert_eq!(
            injection_from_args(None, Some("training")),
            Ok(Some(Injection::Subtype(IncidentSubtype::Stage(Stage::Training))))
        );
    }

    #[test]
    fn mismatched_kind_and_subtype_is_rejected() {
        assert!(injection_from_args(Some("model"), Some("missing")).is_err());
        assert!(injection_from_args(Some("data"), Some("bogus")).is_err());
    }

    #[test]
    fn menu_picks_and_quits() {
        let mut input: &[u8] = b"2\n";
        let mut output = Vec::new();
        let mut console = Console::new(&mut input, &mut output);
        assert_eq!(
            choose_injection(&mut console).unwrap(),
            Choice::Picked(Injection::Subtype(IncidentSubtype::Data(
                DataCorruption::MissingValues
            )))
        );

        let mut input: &[u8] = b"q\n";
        let mut console = Console::new(&mut input, &mut output);
        assert_eq!(choose_injection(&mut console).unwrap(), Choice::Quit);

        let mut input: &[u8] = b"7\n";
        let mut console = Console::new(&mut input, &mut output);
        assert_eq!(choose_injection(&mut console).unwrap(), Choice::Picked(Injection::Random));
    }

    #[test]
    fn menu_rejects_out_of_range() {
        let mut input: &[u8] = b"9\n";
        let mut output = Vec::new();
        let mut console = Console::new(&mut input, &mut output);
        assert!(matches!(choose_injection(&mut console).unwrap(), Choice::Invalid(_)));
    }

    #[test]
    fn pipeline_choice_asks_for_stage() {
        let mut input: &[u8] = b"6\nevaluation\n";
        let mut output = Vec::new();
        let mut console = Console::new(&mut input, &mut output);
        assert_eq!(
            choose_injection(&mut console).unwrap(),
            Choice::Picked(Injection::Subtype(IncidentSubtype::Stage(Stage::Evaluation)))
        );
    }
}
