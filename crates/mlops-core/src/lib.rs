//! MLOps Core
//!
//! Shared plumbing for the workspace:
//! - [`MlopsConfig`]: explicit configuration, built once and passed by reference
//! - [`telemetry::init`]: tracing subscriber setup

#![warn(unreachable_pub)]

pub mod config;
pub mod telemetry;

pub use config::{
    AuditConfig, ConfigError, IncidentConfig, LoggingConfig, MlopsConfig, ModelChoice,
    PathConfig, PipelineConfig, ProjectConfig, VerificationConfig, CONFIG_FILE,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
