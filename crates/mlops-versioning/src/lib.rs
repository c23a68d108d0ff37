//! MLOps Versioning
//!
//! Point-in-time snapshots of code, data, models and experiment runs, and
//! the rollback path back to them.
//!
//! # Core Concepts
//!
//! - [`Snapshot`] / [`SnapshotStore`]: immutable records in an append-only log
//! - [`ModelRegistry`]: staged model versions with their own artifact copies
//! - [`VersionController`]: `create_snapshot` / `rollback_to` over a [`mlops_artifact::RemoteStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = VersionController::from_config(&config)?;
//! controller.create_snapshot("v1.0.0", "baseline", true, true)?;
//! // ... later
//! controller.rollback_to("v1.0.0")?;
//! ```

#![warn(unreachable_pub)]

mod code;
mod controller;
mod error;
mod registry;
mod snapshot;

pub use code::{CodeRevisionSource, GitRevision, StaticRevision, UNVERSIONED};
pub use controller::{RestoreScope, VersionController, VersionInfo};
pub use error::VersioningError;
pub use registry::{ModelRegistry, ModelStage, ModelVersion};
pub use snapshot::{Snapshot, SnapshotStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
