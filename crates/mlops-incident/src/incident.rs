//! Incident records

use chrono::{DateTime, Utc};
use mlops_artifact::{BackupRecord, ContentHash, Fingerprint};
use mlops_pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What kind of fault was injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    DataCorruption,
    ModelDegradation,
    PipelineFailure,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataCorruption => "data_corruption",
            Self::ModelDegradation => "model_degradation",
            Self::PipelineFailure => "pipeline_failure",
        })
    }
}

/// Data corruption modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCorruption {
    /// Add bounded noise to numeric cells in a fraction of rows
    RandomNoise,
    /// Blank out a fraction of cells
    MissingValues,
    /// Append copies of existing rows
    Duplicates,
}

/// Model degradation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelDegradation {
    Deletion,
    /// Overwrite with bytes that are not a model
    Corruption,
}

/// Subtype recorded on an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSubtype {
    Data(DataCorruption),
    Model(ModelDegradation),
    Stage(Stage),
}

impl IncidentSubtype {
    /// Kind implied by the subtype
    #[must_use]
    pub const fn kind(self) -> IncidentKind {
        match self {
            Self::Data(_) => IncidentKind::DataCorruption,
            Self::Model(_) => IncidentKind::ModelDegradation,
            Self::Stage(_) => IncidentKind::PipelineFailure,
        }
    }
}

impl fmt::Display for IncidentSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(DataCorruption::RandomNoise) => f.write_str("random_noise"),
            Self::Data(DataCorruption::MissingValues) => f.write_str("missing_values"),
            Self::Data(DataCorruption::Duplicates) => f.write_str("duplicates"),
            Self::Model(ModelDegradation::Deletion) => f.write_str("deletion"),
            Self::Model(ModelDegradation::Corruption) => f.write_str("corruption"),
            Self::Stage(stage) => write!(f, "{stage}"),
        }
    }
}

/// Unknown subtype name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown incident subtype {0:?}")]
pub struct ParseSubtypeError(String);

impl FromStr for IncidentSubtype {
    type Err = ParseSubtypeError;

    /// Accepts the display names plus the short aliases `noise`, `missing`,
    /// `duplicate`, `delete` and `corrupt`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let subtype = match s.trim().to_ascii_lowercase().as_str() {
            "random_noise" | "random" | "noise" => Self::Data(DataCorruption::RandomNoise),
            "missing_values" | "missing" => Self::Data(DataCorruption::MissingValues),
            "duplicates" | "duplicate" => Self::Data(DataCorruption::Duplicates),
            "deletion" | "delete" => Self::Model(ModelDegradation::Deletion),
            "corruption" | "corrupt" => Self::Model(ModelDegradation::Corruption),
            other => other
                .parse::<Stage>()
                .map(Self::Stage)
                .map_err(|_| ParseSubtypeError(s.to_string()))?,
        };
        Ok(subtype)
    }
}

/// Pointer to the local copy taken right before injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReference {
    /// Where the copy lives
    pub backup_path: PathBuf,
    /// Size of the copy
    pub size_bytes: u64,
    /// Hash of the copy
    pub content_hash: ContentHash,
    /// When the copy was taken
    pub created_at: DateTime<Utc>,
}

impl From<BackupRecord> for BackupReference {
    fn from(record: BackupRecord) -> Self {
        Self {
            backup_path: record.backup_path,
            size_bytes: record.fingerprint.size_bytes,
            content_hash: record.fingerprint.content_hash,
            created_at: record.created_at,
        }
    }
}

/// Shape of the artifact before injection, used by verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreIncidentState {
    /// Size before injection
    pub size_bytes: u64,
    /// Hash before injection
    pub content_hash: ContentHash,
    /// Data rows, for tabular artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
}

impl From<Fingerprint> for PreIncidentState {
    fn from(fp: Fingerprint) -> Self {
        Self {
            size_bytes: fp.size_bytes,
            content_hash: fp.content_hash,
            rows: None,
            columns: None,
        }
    }
}

/// An injected fault; immutable once emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// ULID, sortable by creation time
    pub incident_id: String,
    /// Incident kind; selects the strategy chain
    pub kind: IncidentKind,
    /// Concrete fault
    pub subtype: IncidentSubtype,
    /// Mutated artifact, or the failure marker for pipeline incidents
    pub target_path: PathBuf,
    /// Injection time
    pub timestamp: DateTime<Utc>,
    /// Local backup; `None` for pipeline failures
    pub backup_reference: Option<BackupReference>,
    /// Fingerprint taken before injection
    pub pre_incident: Option<PreIncidentState>,
    /// What the injection did, e.g. how many rows were touched
    pub detail: String,
}

impl Incident {
    /// Failed stage, for pipeline incidents
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self.subtype {
            IncidentSubtype::Stage(stage) => Some(stage),
            _ => None,
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} on {}",
            self.incident_id,
            self.kind,
            self.subtype,
            self.target_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subtype_names_and_aliases() {
        for (text, expected) in [
            ("noise", IncidentSubtype::Data(DataCorruption::RandomNoise)),
            ("missing_values", IncidentSubtype::Data(DataCorruption::MissingValues)),
            ("duplicate", IncidentSubtype::Data(DataCorruption::Duplicates)),
            ("delete", IncidentSubtype::Model(ModelDegradation::Deletion)),
            ("corruption", IncidentSubtype::Model(ModelDegradation::Corruption)),
            ("training", IncidentSubtype::Stage(Stage::Training)),
        ] {
            assert_eq!(text.parse::<IncidentSubtype>().unwrap(), expected);
        }
        assert!("meteor".parse::<IncidentSubtype>().is_err());
        assert_eq!(
            IncidentSubtype::Stage(Stage::Evaluation).kind(),
            IncidentKind::PipelineFailure
        );
        assert_eq!(IncidentSubtype::Data(DataCorruption::RandomNoise).to_string(), "random_noise");
    }

    #[test]
    fn incident_serializes_with_snake_case_kinds() {
        let incident = Incident {
            incident_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            kind: IncidentKind::ModelDegradation,
            subtype: IncidentSubtype::Model(ModelDegradation::Deletion),
            target_path: PathBuf::from("models/trained/classifier.json"),
            timestamp: Utc::now(),
            backup_reference: None,
            pre_incident: None,
            detail: "deleted".into(),
        };
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["kind"], "model_degradation");
        assert_eq!(json["subtype"]["model"], "deletion");
        let back: Incident = serde_json::from_value(json).unwrap();
        assert_eq!(back, incident);
    }
}
