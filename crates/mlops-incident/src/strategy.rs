//! Recovery strategies and their priority order per incident kind

use crate::incident::IncidentKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One way of returning an artifact or stage to a working state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Copy the pre-incident backup back into place
    LocalBackup,
    /// Pull the last pushed revision from the remote store
    RemoteStore,
    /// Restore data artifacts recorded in the latest snapshot
    SnapshotData,
    /// Restore the model version currently in production
    RegistryProduction,
    /// Clear the failure marker and set the stage back to pending
    ResetStage,
    /// Run the failed stage and every later stage again
    RerunFromStage,
    /// Target already matched its pre-incident state; nothing was done
    AlreadyRecovered,
}

impl RecoveryStrategy {
    /// Ordered chain tried for `kind`, fastest first
    #[must_use]
    pub fn chain(kind: IncidentKind) -> &'static [Self] {
        match kind {
            IncidentKind::DataCorruption => &[Self::LocalBackup, Self::RemoteStore, Self::SnapshotData],
            IncidentKind::ModelDegradation => {
                &[Self::LocalBackup, Self::RemoteStore, Self::RegistryProduction]
            }
            IncidentKind::PipelineFailure => &[Self::ResetStage, Self::RerunFromStage],
        }
    }

    /// Stable snake_case name used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalBackup => "local_backup",
            Self::RemoteStore => "remote_store",
            Self::SnapshotData => "snapshot_data",
            Self::RegistryProduction => "registry_production",
            Self::ResetStage => "reset_stage",
            Self::RerunFromStage => "rerun_from_stage",
            Self::AlreadyRecovered => "already_recovered",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_start_with_the_fastest_strategy() {
        use RecoveryStrategy::*;
        assert_eq!(
            RecoveryStrategy::chain(IncidentKind::DataCorruption),
            &[LocalBackup, RemoteStore, SnapshotData]
        );
        assert_eq!(
            RecoveryStrategy::chain(IncidentKind::ModelDegradation),
            &[LocalBackup, RemoteStore, RegistryProduction]
        );
        assert_eq!(
            RecoveryStrategy::chain(IncidentKind::PipelineFailure),
            &[ResetStage, RerunFromStage]
        );
        for kind in [
            IncidentKind::DataCorruption,
            IncidentKind::ModelDegradation,
            IncidentKind::PipelineFailure,
        ] {
            assert!(!RecoveryStrategy::chain(kind).contains(&AlreadyRecovered));
        }
    }
}
