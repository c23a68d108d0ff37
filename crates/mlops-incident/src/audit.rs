//! Recovery audit log
//!
//! JSON Lines file, one entry per event. Each entry carries the SHA-256 of
//! its own fields and of its predecessor, so edits or deletions inside a
//! file are detectable. The file rotates by size (`file` → `file.1` → …) and
//! every rotated file starts a fresh chain.

use crate::error::IncidentError;
use chrono::{DateTime, Utc};
use mlops_core::AuditConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const GENESIS: [u8; 32] = [0u8; 32];

/// Audit severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        })
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the current file's chain, from 0
    pub seq: u64,
    /// Time the entry was created
    pub timestamp: DateTime<Utc>,
    /// INFO, WARNING or CRITICAL
    pub severity: Severity,
    /// Event name, e.g. `strategy_failed`
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Verification outcome of a strategy attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<bool>,
    #[serde(default)]
    pub detail: String,
    /// Hex SHA-256 of the previous entry
    #[serde(default)]
    pub prev_hash: String,
    /// Hex SHA-256 of this entry
    #[serde(default)]
    pub hash: String,
}

impl AuditEntry {
    /// New unchained entry
    #[must_use]
    pub fn new(severity: Severity, event: &str) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            severity,
            event: event.to_string(),
            incident_id: None,
            strategy: None,
            started_at: None,
            finished_at: None,
            verification: None,
            detail: String::new(),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    /// Attach the incident id
    #[must_use]
    pub fn with_incident(mut self, incident_id: &str) -> Self {
        self.incident_id = Some(incident_id.to_string());
        self
    }

    /// Attach the strategy name
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl ToString) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    /// Attempt window
    #[must_use]
    pub fn with_window(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self.finished_at = Some(finished_at);
        self
    }

    /// Record the verification outcome
    #[must_use]
    pub fn with_verification(mut self, passed: bool) -> Self {
        self.verification = Some(passed);
        self
    }

    /// Attach free-form detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    fn compute_hash(&self, prev: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_le_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update([0]);
        hasher.update(self.severity.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.event.as_bytes());
        hasher.update([0]);
        for field in [&self.incident_id, &self.strategy] {
            hasher.update(field.as_deref().unwrap_or_default().as_bytes());
            hasher.update([0]);
        }
        for time in [self.started_at, self.finished_at] {
            hasher.update(time.map(|t| t.to_rfc3339()).unwrap_or_default().as_bytes());
            hasher.update([0]);
        }
        hasher.update([match self.verification {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        }]);
        hasher.update(self.detail.as_bytes());
        hasher.update([0]);
        hasher.update(prev);
        hasher.finalize().into()
    }
}

#[derive(Debug)]
struct ChainHead {
    next_seq: u64,
    prev_hash: [u8; 32],
}

/// Append-only, hash-chained, size-rotated audit log
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    head: Mutex<ChainHead>,
}

impl AuditLog {
    /// Open (or start) the log at `path`, resuming its chain
    ///
    /// # Errors
    /// Fails if an existing log cannot be read or its last entry is corrupt.
    pub fn open(path: impl Into<PathBuf>, config: &AuditConfig) -> Result<Self, IncidentError> {
        let path = path.into();
        let head = match read_entries(&path)?.last() {
            Some(last) => ChainHead {
                next_seq: last.seq + 1,
                prev_hash: decode_hash(&path, &last.hash)?,
            },
            None => ChainHead {
                next_seq: 0,
                prev_hash: GENESIS,
            },
        };
        Ok(Self {
            path,
            max_bytes: config.max_bytes,
            max_files: config.max_files.max(1),
            head: Mutex::new(head),
        })
    }

    /// Live log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chain and append `entry`, then mirror it to tracing
    ///
    /// # Errors
    /// Fails if the entry cannot be written or the log cannot be rotated.
    pub fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry, IncidentError> {
        let mut head = self.head.lock();

        // both hex hashes are filled in after sizing
        let probe = serde_json::to_string(&entry).map_err(|e| IncidentError::audit(&self.path, e))?;
        let line_len = probe.len() as u64 + 2 * 64 + 1;
        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + line_len > self.max_bytes {
            self.rotate()?;
            *head = ChainHead {
                next_seq: 0,
                prev_hash: GENESIS,
            };
        }

        entry.seq = head.next_seq;
        entry.prev_hash = hex::encode(head.prev_hash);
        let hash = entry.compute_hash(&head.prev_hash);
        entry.hash = hex::encode(hash);

        let line = serde_json::to_string(&entry).map_err(|e| IncidentError::audit(&self.path, e))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| IncidentError::audit(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IncidentError::audit(&self.path, e))?;
        writeln!(file, "{line}")
            .and_then(|()| file.sync_data())
            .map_err(|e| IncidentError::audit(&self.path, e))?;

        head.next_seq += 1;
        head.prev_hash = hash;
        drop(head);

        mirror(&entry);
        Ok(entry)
    }

    /// Entries of the current file, oldest first
    ///
    /// # Errors
    /// Fails on unreadable or unparsable lines.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, IncidentError> {
        let _head = self.head.lock();
        read_entries(&self.path)
    }

    /// Re-derive every hash in the current file
    ///
    /// Returns the number of entries checked.
    ///
    /// # Errors
    /// Returns [`IncidentError::Audit`] naming the first broken link.
    pub fn verify_integrity(&self) -> Result<usize, IncidentError> {
        let entries = self.entries()?;
        let mut prev = GENESIS;
        for (idx, entry) in entries.iter().enumerate() {
            let broken = |what: &str| {
                IncidentError::audit(&self.path, format!("integrity violation at seq {}: {what}", entry.seq))
            };
            if entry.seq != idx as u64 {
                return Err(broken("sequence gap"));
            }
            if decode_hash(&self.path, &entry.prev_hash)? != prev {
                return Err(broken("previous hash does not match"));
            }
            let expected = entry.compute_hash(&prev);
            if decode_hash(&self.path, &entry.hash)? != expected {
                return Err(broken("entry hash does not match content"));
            }
            prev = expected;
        }
        Ok(entries.len())
    }

    /// Rotated file `n` (1 is the most recent)
    #[must_use]
    pub fn rotated_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&self) -> Result<(), IncidentError> {
        for n in (1..self.max_files).rev() {
            let from = self.rotated_path(n);
            if from.exists() {
                fs::rename(&from, self.rotated_path(n + 1)).map_err(|e| IncidentError::audit(&from, e))?;
            }
        }
        fs::rename(&self.path, self.rotated_path(1)).map_err(|e| IncidentError::audit(&self.path, e))?;
        tracing::info!(path = %self.path.display(), "audit log rotated");
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, IncidentError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IncidentError::audit(path, e)),
    };
    let mut entries = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| IncidentError::audit(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|e| IncidentError::audit(path, format!("line {}: {e}", n + 1)))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn decode_hash(path: &Path, text: &str) -> Result<[u8; 32], IncidentError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(text, &mut out)
        .map_err(|e| IncidentError::audit(path, format!("bad hash {text:?}: {e}")))?;
    Ok(out)
}

fn mirror(entry: &AuditEntry) {
    let incident = entry.incident_id.as_deref().unwrap_or("-");
    let strategy = entry.strategy.as_deref().unwrap_or("-");
    match entry.severity {
        Severity::Info => tracing::info!(
            audit = true,
            event = %entry.event,
            incident,
            strategy,
            verification = ?entry.verification,
            "{}",
            entry.detail
        ),
        Severity::Warning => tracing::warn!(
            audit = true,
            event = %entry.event,
            incident,
            strategy,
            verification = ?entry.verification,
            "{}",
            entry.detail
        ),
        Severity::Critical => tracing::error!(
            audit = true,
            critical = true,
            event = %entry.event,
            incident,
            strategy,
            "{}",
            entry.detail
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max_bytes: u64) -> AuditConfig {
        AuditConfig {
            max_bytes,
            max_files: 2,
            ..AuditConfig::default()
        }
    }

    #[test]
    fn chain_survives_reopen_and_verifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/audit.jsonl");
        {
            let log = AuditLog::open(&path, &config(1 << 20)).unwrap();
            log.append(AuditEntry::new(Severity::Info, "recovery_started").with_incident("i1"))
                .unwrap();
        }
        let log = AuditLog::open(&path, &config(1 << 20)).unwrap();
        let entry = log
            .append(
                AuditEntry::new(Severity::Warning, "strategy_failed")
                    .with_incident("i1")
                    .with_strategy("local_backup")
                    .with_verification(false),
            )
            .unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(log.verify_integrity().unwrap(), 2);
        assert_eq!(log.entries().unwrap()[1].severity, Severity::Warning);
    }

    #[test]
    fn tampering_is_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path, &config(1 << 20)).unwrap();
        log.append(AuditEntry::new(Severity::Info, "a").with_detail("first")).unwrap();
        log.append(AuditEntry::new(Severity::Critical, "b").with_detail("second")).unwrap();

        let text = fs::read_to_string(&path).unwrap().replace("second", "edited");
        fs::write(&path, text).unwrap();
        let err = log.verify_integrity().unwrap_err();
        assert!(err.to_string().contains("integrity violation at seq 1"));
    }

    #[test]
    fn rotation_restarts_the_chain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path, &config(300)).unwrap();
        for i in 0..6 {
            log.append(AuditEntry::new(Severity::Info, "tick").with_detail(format!("entry {i}")))
                .unwrap();
        }
        assert!(log.rotated_path(1).is_file());
        assert!(!log.rotated_path(3).exists());
        assert!(log.verify_integrity().unwrap() >= 1);
        assert_eq!(log.entries().unwrap()[0].seq, 0);
    }

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
    }
}
