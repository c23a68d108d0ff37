//! Workspace configuration
//!
//! [`MlopsConfig`] is built once at process start (from YAML or from
//! defaults for a root directory) and handed by reference to every component.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name looked up in the workspace root
pub const CONFIG_FILE: &str = "mlops.yaml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlopsConfig {
    /// Project metadata
    pub project: ProjectConfig,
    /// Artifact and state locations
    pub paths: PathConfig,
    /// Incident injection parameters
    pub incident: IncidentConfig,
    /// Post-recovery verification bounds
    pub verification: VerificationConfig,
    /// Audit log settings
    pub audit: AuditConfig,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
    #[serde(skip)]
    root: PathBuf,
    #[serde(skip)]
    raw: serde_yaml::Value,
}

impl Default for MlopsConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            paths: PathConfig::default(),
            incident: IncidentConfig::default(),
            verification: VerificationConfig::default(),
            audit: AuditConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
            root: PathBuf::from("."),
            raw: serde_yaml::Value::Null,
        }
    }
}

impl MlopsConfig {
    /// Default configuration rooted at `root`
    ///
    /// # Errors
    /// Never fails for defaults; returns `Result` for symmetry with [`MlopsConfig::load`].
    pub fn for_root(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.resolve(root.into());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// Relative paths are resolved against the file's directory.
    ///
    /// # Errors
    /// Returns [`ConfigError::NotFound`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_yaml_str(&text, root)
    }

    /// Parse configuration from YAML text, resolving paths against `root`
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_yaml_str(text: &str, root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mut config: Self = if raw.is_null() {
            Self::default()
        } else {
            serde_yaml::from_value(raw.clone())?
        };
        config.raw = raw;
        config.resolve(root.into());
        config.validate()?;
        Ok(config)
    }

    /// Load `mlops.yaml` from `root` if present, defaults otherwise
    ///
    /// # Errors
    /// Propagates errors from [`MlopsConfig::load`] when the file exists.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let candidate = root.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Self::for_root(root)
        }
    }

    /// Workspace root all relative paths were resolved against
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a raw value by dot-separated key, e.g. `incident.noise_fraction`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        key.split('.').try_fold(&self.raw, |value, part| value.get(part))
    }

    /// Create every configured directory
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] for the first directory that cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in self.paths.all() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Pointer index of the remote store
    #[must_use]
    pub fn tracked_index_path(&self) -> PathBuf {
        self.paths.state.join("tracked.json")
    }

    /// Append-only snapshot log
    #[must_use]
    pub fn snapshot_log_path(&self) -> PathBuf {
        self.paths.snapshots.join("snapshots.jsonl")
    }

    /// Persisted pipeline stage state
    #[must_use]
    pub fn pipeline_state_path(&self) -> PathBuf {
        self.paths.state.join("pipeline_state.json")
    }

    /// Recovery audit log
    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.paths.logs.join(&self.audit.file_name)
    }

    fn resolve(&mut self, root: PathBuf) {
        self.paths.resolve(&root);
        self.root = root;
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("incident.noise_fraction", self.incident.noise_fraction),
            ("incident.missing_fraction", self.incident.missing_fraction),
        ];
        for (key, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(key, format!("{value} is outside [0, 1]")));
            }
        }
        if self.incident.duplicate_factor < 0.0 {
            return Err(ConfigError::invalid("incident.duplicate_factor", "must be >= 0"));
        }
        if self.incident.noise_bound <= 0.0 {
            return Err(ConfigError::invalid("incident.noise_bound", "must be > 0"));
        }
        for (key, value) in [
            ("verification.size_tolerance", self.verification.size_tolerance),
            ("verification.row_tolerance", self.verification.row_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }
        if self.audit.max_files == 0 {
            return Err(ConfigError::invalid("audit.max_files", "must be at least 1"));
        }
        if self.pipeline.test_every < 2 {
            return Err(ConfigError::invalid("pipeline.test_every", "must be at least 2"));
        }
        Ok(())
    }
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,
    /// Project version
    pub version: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "mlops-pipeline".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

/// Artifact and state locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Raw datasets
    pub raw_data: PathBuf,
    /// Preprocessed datasets
    pub processed_data: PathBuf,
    /// Trained model artifacts
    pub models: PathBuf,
    /// Timestamped local backups
    pub backups: PathBuf,
    /// Content-addressed remote store
    pub remote: PathBuf,
    /// Snapshot log
    pub snapshots: PathBuf,
    /// Model registry
    pub registry: PathBuf,
    /// Pipeline failure markers
    pub markers: PathBuf,
    /// Internal state (pointer index, stage state, metrics)
    pub state: PathBuf,
    /// Audit and diagnostic logs
    pub logs: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            raw_data: PathBuf::from("data/raw"),
            processed_data: PathBuf::from("data/processed"),
            models: PathBuf::from("models/trained"),
            backups: PathBuf::from(".backups"),
            remote: PathBuf::from(".remote"),
            snapshots: PathBuf::from(".snapshots"),
            registry: PathBuf::from("models/registry"),
            markers: PathBuf::from(".incident_markers"),
            state: PathBuf::from(".state"),
            logs: PathBuf::from("logs"),
        }
    }
}

impl PathConfig {
    fn all(&self) -> [&Path; 10] {
        [
            &self.raw_data,
            &self.processed_data,
            &self.models,
            &self.backups,
            &self.remote,
            &self.snapshots,
            &self.registry,
            &self.markers,
            &self.state,
            &self.logs,
        ]
    }

    fn resolve(&mut self, root: &Path) {
        for path in [
            &mut self.raw_data,
            &mut self.processed_data,
            &mut self.models,
            &mut self.backups,
            &mut self.remote,
            &mut self.snapshots,
            &mut self.registry,
            &mut self.markers,
            &mut self.state,
            &mut self.logs,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

/// Incident injection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Fraction of rows receiving random noise
    pub noise_fraction: f64,
    /// Maximum absolute noise added to a numeric cell
    pub noise_bound: f64,
    /// Fraction of cells replaced by the missing marker
    pub missing_fraction: f64,
    /// Text written in place of a missing cell
    pub missing_marker: String,
    /// Row-count inflation factor for duplicate injection
    pub duplicate_factor: f64,
    /// Fixed RNG seed; random when unset
    pub seed: Option<u64>,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            noise_fraction: 0.1,
            noise_bound: 1000.0,
            missing_fraction: 0.2,
            missing_marker: String::new(),
            duplicate_factor: 0.3,
            seed: None,
        }
    }
}

/// Post-recovery verification bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Allowed relative deviation from the pre-incident size
    pub size_tolerance: f64,
    /// Allowed relative deviation from the pre-incident row count
    pub row_tolerance: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            size_tolerance: 0.05,
            row_tolerance: 0.05,
        }
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// File name inside the logs directory
    pub file_name: String,
    /// Rotate once the file would exceed this size
    pub max_bytes: u64,
    /// Rotated files kept
    pub max_files: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file_name: "recovery_audit.jsonl".to_string(),
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// Which model variant the training stage fits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    /// Predict the most frequent class
    Majority,
    /// Nearest class centroid
    #[default]
    NearestCentroid,
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw dataset file name under `paths.raw_data`
    pub dataset: String,
    /// Label column
    pub target_column: String,
    /// Registered model name
    pub model_name: String,
    /// Model variant to train
    pub model: ModelChoice,
    /// Every n-th row goes to the test split
    pub test_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: "customer_data.csv".to_string(),
            target_column: "target".to_string(),
            model_name: "classifier".to_string(),
            model: ModelChoice::default(),
            test_every: 5,
        }
    }
}

/// Diagnostic logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// IO error
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML error
    #[error("invalid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Value out of range
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn defaults_resolve_against_root() {
        let config = MlopsConfig::for_root("/srv/ml").unwrap();
        assert_eq!(config.paths.raw_data, PathBuf::from("/srv/ml/data/raw"));
        assert_eq!(config.audit_log_path(), PathBuf::from("/srv/ml/logs/recovery_audit.jsonl"));
        assert!((config.verification.size_tolerance - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn yaml_overrides_and_dot_lookup() {
        let yaml = "
incident:
  noise_fraction: 0.25
  seed: 7
paths:
  remote: /mnt/remote
pipeline:
  model: majority
";
        let config = MlopsConfig::from_yaml_str(yaml, "/work").unwrap();
        assert!((config.incident.noise_fraction - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.incident.seed, Some(7));
        assert_eq!(config.paths.remote, PathBuf::from("/mnt/remote"));
        assert_eq!(config.paths.models, PathBuf::from("/work/models/trained"));
        assert_eq!(config.pipeline.model, ModelChoice::Majority);
        assert_eq!(
            config.get("incident.noise_fraction").and_then(serde_yaml::Value::as_f64),
            Some(0.25)
        );
        assert!(config.get("incident.unknown").is_none());
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let err = MlopsConfig::from_yaml_str("incident:\n  missing_fraction: 1.5\n", "/w").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "incident.missing_fraction"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = MlopsConfig::from_yaml_str("", "/w").unwrap();
        assert_eq!(config.pipeline.dataset, "customer_data.csv");
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = MlopsConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn discover_and_ensure_dirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "audit:\n  max_files: 2\n").unwrap();
        let config = MlopsConfig::discover(dir.path()).unwrap();
        assert_eq!(config.audit.max_files, 2);
        config.ensure_dirs().unwrap();
        assert!(config.paths.markers.is_dir());
        assert!(config.paths.registry.is_dir());
    }
}
