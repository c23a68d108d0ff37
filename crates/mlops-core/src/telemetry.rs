//! Diagnostic logging setup
//!
//! `RUST_LOG` takes precedence over `logging.level` from the configuration.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Safe to call more than once; later calls are ignored (tests and the CLI
/// may both initialise logging).
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    if result.is_err() {
        tracing::trace!("tracing subscriber already installed");
    }
}
