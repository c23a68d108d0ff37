//! `mlops` binary: parses arguments, loads configuration and runs one command

use clap::ArgMatches;
use mlops_cli::{cli, execute, Console, Exit};
use mlops_core::{telemetry, MlopsConfig};
use std::io;
use std::path::PathBuf;

fn load_config(matches: &ArgMatches) -> anyhow::Result<MlopsConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => MlopsConfig::load(path)?,
        None => MlopsConfig::discover(&std::env::current_dir()?)?,
    };
    config.ensure_dirs()?;
    Ok(config)
}

fn main() {
    let matches = cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(Exit::Usage.code());
        }
    };
    telemetry::init(&config.logging);

    let mut input = io::stdin().lock();
    let mut output = io::stdout().lock();
    let mut console = Console::new(&mut input, &mut output);
    let exit = match execute(&config, &matches, &mut console) {
        Ok(exit) => exit,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            Exit::Unrecoverable
        }
    };
    std::process::exit(exit.code());
}
