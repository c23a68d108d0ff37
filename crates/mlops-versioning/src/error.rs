//! Error types for versioning operations

use mlops_artifact::StoreError;
use std::path::PathBuf;

/// Versioning errors
///
/// `DuplicateTag` and `SnapshotNotFound` are caller errors: they are surfaced
/// as-is and leave the workspace untouched.
#[derive(Debug, thiserror::Error)]
pub enum VersioningError {
    /// A snapshot with this tag already exists
    #[error("snapshot tag already exists: {0}")]
    DuplicateTag(String),

    /// No snapshot with this tag
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Tag is not usable as a snapshot identifier
    #[error("invalid snapshot tag {tag:?}: {reason}")]
    InvalidTag { tag: String, reason: &'static str },

    /// No registered model matches
    #[error("model not found in registry: {name}{}", .version.map(|v| format!(" v{v}")).unwrap_or_default())]
    ModelNotFound { name: String, version: Option<u32> },

    /// Registry index is missing
    #[error("model registry unavailable at {}", .0.display())]
    RegistryUnavailable(PathBuf),

    /// Artifact store or remote failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IO error on a log or index file
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Log or index entry could not be (de)serialized
    #[error("corrupt record in {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Source-control command failed
    #[error("code revision error: {0}")]
    Code(String),
}

impl VersioningError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            VersioningError::DuplicateTag("v1.0.0".into()).to_string(),
            "snapshot tag already exists: v1.0.0"
        );
        assert_eq!(
            VersioningError::ModelNotFound { name: "clf".into(), version: Some(3) }.to_string(),
            "model not found in registry: clf v3"
        );
        assert_eq!(
            VersioningError::ModelNotFound { name: "clf".into(), version: None }.to_string(),
            "model not found in registry: clf"
        );
    }
}
