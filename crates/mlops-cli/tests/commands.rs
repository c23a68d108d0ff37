//! End-to-end command tests against a throwaway workspace.
//!
//! Core guarantees exercised here:
//! - `pipeline init` leaves a trained, tracked, production-registered model.
//! - `simulate` recovers every injected incident and exits 0.
//! - `rollback` restores a chosen snapshot; `q` cancels without changes.
//! - Bad input exits with the usage status, never a panic.

use mlops_cli::{cli, execute, Console, Exit};
use mlops_test_utils::{read_bytes, TestWorkspace};
use mlops_versioning::{ModelStage, VersionController};
use pretty_assertions::assert_eq;
use std::fs;

fn run(ws: &TestWorkspace, args: &[&str], input: &str) -> (Exit, String) {
    let matches = cli()
        .try_get_matches_from(std::iter::once("mlops").chain(args.iter().copied()))
        .unwrap();
    let mut input = input.as_bytes();
    let mut output = Vec::new();
    let exit = {
        let mut console = Console::new(&mut input, &mut output);
        execute(&ws.config, &matches, &mut console).unwrap()
    };
    (exit, String::from_utf8(output).unwrap())
}

fn initialised() -> TestWorkspace {
    let ws = TestWorkspace::new();
    let (exit, _) = run(&ws, &["pipeline", "init", "--rows", "120", "--features", "3"], "");
    assert_eq!(exit, Exit::Success);
    ws
}

/// Tenet: init trains, tracks and promotes the model.
#[test]
fn pipeline_init_promotes_model() {
    let ws = TestWorkspace::new();
    let (exit, out) = run(&ws, &["pipeline", "init", "--rows", "120", "--features", "3"], "");
    assert_eq!(exit, Exit::Success);
    assert!(out.contains("Stages run: preprocessing, training, evaluation"));

    let runner = ws.runner();
    assert!(runner.model_path().is_file());
    let vc = VersionController::from_config(&ws.config).unwrap();
    assert!(vc.remote().tracked_revision(runner.raw_dataset_path()).is_some());
    let production = vc
        .registry()
        .latest_in_stage(&ws.config.pipeline.model_name, ModelStage::Production)
        .unwrap()
        .unwrap();
    assert_eq!(production.version, 1);
}

/// Tenet: a noise incident is reverted to the exact pre-incident bytes.
#[test]
fn simulate_noise_recovers() {
    let ws = initialised();
    let before = read_bytes(&ws.dataset_path());

    let (exit, out) = run(&ws, &["simulate", "--kind", "data", "--subtype", "noise"], "");
    assert_eq!(exit, Exit::Success, "{out}");
    assert!(out.contains("Incident injected"));
    assert!(out.contains("Recovery succeeded"));
    assert!(out.contains("local_backup"));
    assert_eq!(read_bytes(&ws.dataset_path()), before);
}

/// Tenet: the interactive menu drives the same flow.
#[test]
fn simulate_menu_model_deletion() {
    let ws = initialised();
    let model = ws.runner().model_path().to_path_buf();
    let before = read_bytes(&model);

    let (exit, out) = run(&ws, &["simulate", "--no-snapshot"], "4\n");
    assert_eq!(exit, Exit::Success, "{out}");
    assert!(out.contains("Select incident to simulate"));
    assert!(!out.contains("Snapshot"));
    assert_eq!(read_bytes(&model), before);
}

/// Tenet: a failed stage is reset and the pipeline reruns.
#[test]
fn simulate_pipeline_failure_recovers() {
    let ws = initialised();
    let (exit, out) = run(&ws, &["simulate", "--subtype", "training"], "");
    assert_eq!(exit, Exit::Success, "{out}");
    assert!(!ws.runner().markers().is_set(mlops_pipeline::Stage::Training));

    let (exit, _) = run(&ws, &["pipeline", "run", "--from", "training"], "");
    assert_eq!(exit, Exit::Success);
}

/// Tenet: every recovery leaves an intact audit chain.
#[test]
fn audit_verifies_after_simulation() {
    let ws = initialised();
    run(&ws, &["simulate", "--kind", "model", "--subtype", "corrupt"], "");
    let (exit, out) = run(&ws, &["audit", "verify"], "");
    assert_eq!(exit, Exit::Success);
    assert!(out.contains("Audit log intact"));
}

/// Tenet: choosing a snapshot by number restores it.
#[test]
fn interactive_rollback_restores_snapshot() {
    let ws = initialised();
    let dataset = ws.dataset_path();
    let before = read_bytes(&dataset);
    let (exit, _) = run(&ws, &["snapshot", "create", "v1.0.0", "-d", "baseline"], "");
    assert_eq!(exit, Exit::Success);

    fs::write(&dataset, b"broken\n").unwrap();
    let (_, listing) = run(&ws, &["snapshot", "list"], "");
    assert!(listing.contains("v1.0.0"));
    assert!(listing.contains("modified:"));

    let (exit, out) = run(&ws, &["rollback"], "1\n");
    assert_eq!(exit, Exit::Success, "{out}");
    assert!(out.contains("Rollback completed"));
    assert_eq!(read_bytes(&dataset), before);
}

/// Tenet: `q` cancels a rollback and leaves the workspace alone.
#[test]
fn rollback_quit_changes_nothing() {
    let ws = initialised();
    run(&ws, &["snapshot", "create", "v1.0.0"], "");
    fs::write(ws.dataset_path(), b"edited\n").unwrap();

    let (exit, out) = run(&ws, &["rollback"], "q\n");
    assert_eq!(exit, Exit::Success);
    assert!(out.contains("Rollback cancelled"));
    assert_eq!(read_bytes(&ws.dataset_path()), b"edited\n");
}

/// Tenet: bad input maps to the usage status.
#[test]
fn bad_input_is_a_usage_error() {
    let ws = TestWorkspace::new();
    assert_eq!(run(&ws, &["rollback"], "").0, Exit::Usage);
    assert_eq!(run(&ws, &["rollback", "--tag", "v9"], "").0, Exit::Usage);
    assert_eq!(run(&ws, &["simulate", "--kind", "data"], "").0, Exit::Usage);
    assert_eq!(
        run(&ws, &["simulate", "--kind", "model", "--subtype", "noise"], "").0,
        Exit::Usage
    );
    assert_eq!(run(&ws, &["pipeline", "run", "--from", "deploy"], "").0, Exit::Usage);

    run(&ws, &["snapshot", "create", "v1"], "");
    assert_eq!(run(&ws, &["snapshot", "create", "v1"], "").0, Exit::Usage);
}
