//! MLOps Incident
//!
//! Deliberate fault injection and the recovery path back out of it.
//!
//! # Core Concepts
//!
//! - [`IncidentGenerator`]: backs up, then corrupts a dataset, degrades a model
//!   or fails a pipeline stage, emitting an [`Incident`]
//! - [`RecoveryCoordinator`]: walks the [`RecoveryStrategy`] chain for the
//!   incident's kind until one verifies
//! - [`Verifier`]: existence, size band and structural checks
//! - [`AuditLog`]: hash-chained JSON Lines record of every attempt
//!
//! # Example
//!
//! ```rust,ignore
//! let mut generator = IncidentGenerator::new(&config);
//! let incident = generator.simulate_data_corruption(&dataset, DataCorruption::RandomNoise)?;
//!
//! let coordinator = RecoveryCoordinator::from_config(&config)?;
//! let result = coordinator.recover_from_incident(&incident)?.into_result()?;
//! assert_eq!(result.strategy_used, Some(RecoveryStrategy::LocalBackup));
//! ```

#![warn(unreachable_pub)]

mod audit;
mod coordinator;
mod error;
mod generator;
mod incident;
mod strategy;
mod verify;

pub use audit::{AuditEntry, AuditLog, Severity};
pub use coordinator::{RecoveryCoordinator, RecoveryOutcome, RecoveryResult, StrategyAttempt};
pub use error::IncidentError;
pub use generator::IncidentGenerator;
pub use incident::{
    BackupReference, DataCorruption, Incident, IncidentKind, IncidentSubtype, ModelDegradation,
    ParseSubtypeError, PreIncidentState,
};
pub use strategy::RecoveryStrategy;
pub use verify::{within_tolerance, Verifier};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
