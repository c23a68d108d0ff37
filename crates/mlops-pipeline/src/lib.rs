//! MLOps Pipeline
//!
//! A deliberately small train/evaluate pipeline whose artifacts the incident
//! tooling corrupts and restores.
//!
//! - [`Stage`]: preprocessing → training → evaluation, with persisted
//!   [`PipelineState`] and [`FailureMarker`] files
//! - [`PipelineRunner`]: runs a stage and everything after it
//! - [`Model`]: fit/predict capability with [`TrainedModel`] variants
//! - [`generate_classification`]: deterministic demo dataset

#![warn(unreachable_pub)]

mod error;
mod model;
mod runner;
mod stage;
mod synthetic;

pub use error::PipelineError;
pub use model::{Dataset, MajorityClassifier, Model, NearestCentroid, TrainedModel};
pub use runner::{Metrics, PipelineReport, PipelineRunner};
pub use stage::{FailureMarker, ParseStageError, PipelineState, Stage, StageRecord, StageStatus};
pub use synthetic::{generate_classification, TARGET_COLUMN};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
