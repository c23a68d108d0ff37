//! Error types for incident simulation and recovery

use crate::incident::IncidentKind;
use crate::strategy::RecoveryStrategy;
use mlops_artifact::{StoreError, TableError};
use mlops_pipeline::PipelineError;
use mlops_versioning::VersioningError;
use std::path::PathBuf;

/// Incident errors
///
/// `VerificationFailed` and `StrategyUnavailable` are absorbed by the
/// recovery loop; only exhaustion of the whole chain reaches callers as
/// `RecoveryExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum IncidentError {
    /// Injection target does not exist
    #[error("artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// Pre-incident backup could not be written; nothing was mutated
    #[error("backup of {} failed: {source}", path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// Every strategy for the incident failed
    #[error("recovery exhausted for incident {incident_id} after {attempts} attempts")]
    RecoveryExhausted { incident_id: String, attempts: usize },

    /// Post-restore checks rejected the artifact
    #[error("verification failed for {}: {reason}", path.display())]
    VerificationFailed { path: PathBuf, reason: String },

    /// A strategy's source (backup, remote, snapshot, registry) is missing
    #[error("{strategy} unavailable: {reason}")]
    StrategyUnavailable {
        strategy: RecoveryStrategy,
        reason: String,
    },

    /// Another recovery of the same target is running
    #[error("recovery already in progress for {}", .0.display())]
    RecoveryInProgress(PathBuf),

    /// Nothing eligible for a random incident of this kind
    #[error("no target available for {0}")]
    NoTarget(IncidentKind),

    /// Dataset has nothing the requested corruption can act on
    #[error("cannot corrupt {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },

    /// Audit log write, read or integrity failure
    #[error("audit log {}: {reason}", path.display())]
    Audit { path: PathBuf, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Versioning(#[from] VersioningError),
}

impl IncidentError {
    /// Create audit error for path
    pub fn audit(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Audit {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unavailable(strategy: RecoveryStrategy, reason: impl Into<String>) -> Self {
        Self::StrategyUnavailable {
            strategy,
            reason: reason.into(),
        }
    }

    /// Whether the error ends the process with the "unrecoverable" status
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::RecoveryExhausted { .. } | Self::Audit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_subject() {
        let err = IncidentError::RecoveryExhausted {
            incident_id: "01J".into(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "recovery exhausted for incident 01J after 3 attempts");
        assert!(err.is_unrecoverable());

        let err = IncidentError::unavailable(RecoveryStrategy::LocalBackup, "no backup recorded");
        assert_eq!(err.to_string(), "local_backup unavailable: no backup recorded");
        assert!(!err.is_unrecoverable());
    }
}
