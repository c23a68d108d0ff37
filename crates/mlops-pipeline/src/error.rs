//! Error types for the pipeline

use crate::stage::Stage;
use mlops_artifact::{StoreError, TableError};
use std::path::PathBuf;

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage is marked failed
    #[error("stage {stage} failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    /// A stage input does not exist
    #[error("missing input for {stage}: {}", path.display())]
    MissingInput { stage: Stage, path: PathBuf },

    /// Dataset lacks a required column
    #[error("column not found: {0}")]
    MissingColumn(String),

    /// Cell could not be parsed as a number
    #[error("non-numeric value {value:?} at row {row}, column {column}")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    /// Nothing to fit or predict on
    #[error("empty dataset")]
    EmptyDataset,

    /// Feature width does not match the fitted model
    #[error("expected {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    /// Model used before `fit`
    #[error("model must be fitted before making predictions")]
    NotFitted,

    /// Table parsing or integrity failure
    #[error(transparent)]
    Table(#[from] TableError),

    /// Artifact store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// State, model or metrics (de)serialization failure
    #[error("corrupt {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create serialization error for path
    pub fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}
