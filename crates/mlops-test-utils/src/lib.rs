//! Testing utilities for the MLOps workspace
//!
//! Shared fixtures: a throwaway workspace with its configuration, datasets
//! and trained models.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use mlops_core::MlopsConfig;
use mlops_pipeline::{generate_classification, PipelineReport, PipelineRunner};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Seed used by every fixture
pub const SEED: u64 = 42;

/// Temporary workspace root with default configuration and directories
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    pub config: MlopsConfig,
}

impl TestWorkspace {
    /// Fresh workspace; incident randomness is seeded with [`SEED`]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let mut config = MlopsConfig::for_root(dir.path()).expect("default config");
        config.incident.seed = Some(SEED);
        config.ensure_dirs().expect("create workspace dirs");
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Configured raw dataset location
    pub fn dataset_path(&self) -> PathBuf {
        self.config.paths.raw_data.join(&self.config.pipeline.dataset)
    }

    /// Write a synthetic raw dataset and return its path
    pub fn write_dataset(&self, rows: usize, features: usize) -> PathBuf {
        let path = self.dataset_path();
        fs::write(&path, generate_classification(rows, features, SEED).to_csv())
            .expect("write dataset");
        path
    }

    /// Write `bytes` as a model file under the models dir
    pub fn write_model(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.config.paths.models.join(name);
        fs::write(&path, bytes).expect("write model");
        path
    }

    pub fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(&self.config)
    }

    /// Write a 100-row dataset and run every stage
    pub fn train_pipeline(&self) -> PipelineReport {
        self.write_dataset(100, 4);
        self.runner().run_all().expect("pipeline run")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a file, panicking with its path on failure
pub fn read_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}
