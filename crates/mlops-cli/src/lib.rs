//! Command line front end for the versioning and recovery workspace
//!
//! The binary is a thin shell over [`execute`]: argument definitions live in
//! [`cli`], command bodies in private modules, and all console traffic goes
//! through a [`Console`] so the interactive flows can be driven from tests.

mod commands;
mod console;

pub use console::Console;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mlops_core::MlopsConfig;
use std::path::PathBuf;

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Command completed
    Success,
    /// Recovery or rollback could not restore a healthy state
    Unrecoverable,
    /// Bad input: unknown tag, invalid menu choice, missing target
    Usage,
}

impl Exit {
    /// Numeric code handed to the operating system
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Unrecoverable => 1,
            Self::Usage => 2,
        }
    }
}

/// Argument definitions for the `mlops` binary
#[must_use]
pub fn cli() -> Command {
    Command::new("mlops")
        .version(mlops_core::VERSION)
        .about("Artifact versioning, incident simulation and automated recovery")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to mlops.yaml (default: ./mlops.yaml if present)"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Inject an incident and drive automatic recovery")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_parser(["data", "model", "pipeline", "random"])
                        .help("Incident kind; prompts with a menu when omitted"),
                )
                .arg(
                    Arg::new("subtype")
                        .long("subtype")
                        .help("noise, missing, duplicates, deletion, corruption or a stage name"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .value_parser(value_parser!(PathBuf))
                        .help("Artifact to damage, relative to the workspace root (default: configured dataset or model)"),
                )
                .arg(
                    Arg::new("no-snapshot")
                        .long("no-snapshot")
                        .action(ArgAction::SetTrue)
                        .help("Skip the pre-incident snapshot"),
                ),
        )
        .subcommand(
            Command::new("rollback")
                .about("Restore data and models from a snapshot")
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .help("Snapshot tag; prompts with the snapshot list when omitted"),
                ),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Create or list snapshots")
                .subcommand_required(true)
                .subcommand(
                    Command::new("create")
                        .about("Record the current data, models and code revision")
                        .arg(Arg::new("tag").required(true).help("Unique version tag"))
                        .arg(
                            Arg::new("description")
                                .short('d')
                                .long("description")
                                .default_value("")
                                .help("Free-form description"),
                        )
                        .arg(
                            Arg::new("no-data")
                                .long("no-data")
                                .action(ArgAction::SetTrue)
                                .help("Leave datasets out of the snapshot"),
                        )
                        .arg(
                            Arg::new("no-models")
                                .long("no-models")
                                .action(ArgAction::SetTrue)
                                .help("Leave models out of the snapshot"),
                        ),
                )
                .subcommand(Command::new("list").about("List snapshots and the working state")),
        )
        .subcommand(
            Command::new("pipeline")
                .about("Generate data and run the training pipeline")
                .subcommand_required(true)
                .subcommand(
                    Command::new("init")
                        .about("Generate a synthetic dataset, train and promote the model")
                        .arg(
                            Arg::new("rows")
                                .long("rows")
                                .default_value("500")
                                .value_parser(value_parser!(usize))
                                .help("Number of dataset rows"),
                        )
                        .arg(
                            Arg::new("features")
                                .long("features")
                                .default_value("4")
                                .value_parser(value_parser!(usize))
                                .help("Number of feature columns"),
                        )
                        .arg(
                            Arg::new("seed")
                                .long("seed")
                                .default_value("42")
                                .value_parser(value_parser!(u64))
                                .help("Random seed for reproducibility"),
                        ),
                )
                .subcommand(
                    Command::new("run")
                        .about("Run the pipeline, optionally from a given stage")
                        .arg(
                            Arg::new("from")
                                .long("from")
                                .help("preprocessing, training or evaluation"),
                        ),
                ),
        )
        .subcommand(
            Command::new("audit")
                .about("Inspect the recovery audit log")
                .subcommand_required(true)
                .subcommand(Command::new("verify").about("Check the audit hash chain")),
        )
}

/// Run the command selected in `matches`
///
/// # Errors
/// Returns infrastructure failures (I/O, corrupt state files). Expected
/// outcomes such as a failed recovery are reported through [`Exit`].
pub fn execute(
    config: &MlopsConfig,
    matches: &ArgMatches,
    console: &mut Console<'_>,
) -> anyhow::Result<Exit> {
    match matches.subcommand() {
        Some(("simulate", args)) => commands::simulate(config, args, console),
        Some(("rollback", args)) => commands::rollback(config, args, console),
        Some(("snapshot", args)) => match args.subcommand() {
            Some(("create", args)) => commands::snapshot_create(config, args, console),
            Some(("list", _)) => commands::snapshot_list(config, console),
            _ => Ok(Exit::Usage),
        },
        Some(("pipeline", args)) => match args.subcommand() {
            Some(("init", args)) => commands::pipeline_init(config, args, console),
            Some(("run", args)) => commands::pipeline_run(config, args, console),
            _ => Ok(Exit::Usage),
        },
        Some(("audit", args)) => match args.subcommand() {
            Some(("verify", _)) => commands::audit_verify(config, console),
            _ => Ok(Exit::Usage),
        },
        _ => Ok(Exit::Usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["mlops", "audit", "verify", "--config", "x.yaml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("x.yaml"))
        );
    }

    #[test]
    fn unknown_kind_is_rejected_by_parser() {
        assert!(cli()
            .try_get_matches_from(["mlops", "simulate", "--kind", "network"])
            .is_err());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Exit::Success.code(), 0);
        assert_eq!(Exit::Unrecoverable.code(), 1);
        assert_eq!(Exit::Usage.code(), 2);
    }
}
