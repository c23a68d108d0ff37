//! MLOps Artifact Store
//!
//! Filesystem artifacts (datasets and trained models) with safe mutation
//! and two places to recover them from.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte Blake3 hash, doubling as the remote [`Revision`] id
//! - [`ArtifactStore`]: atomic writes/copies and timestamped local backups
//! - [`RemoteStore`]: push/pull/checkout contract over a content-addressed remote
//! - [`Table`]: CSV dataset model with a lightweight integrity check
//!
//! # Example
//!
//! ```rust,ignore
//! use mlops_artifact::{ArtifactStore, LocalRemote, RemoteStore};
//!
//! let store = ArtifactStore::new("backups");
//! let backup = store.backup(Path::new("data/raw/customer_data.csv"))?;
//!
//! let remote = LocalRemote::new("remote", "state/tracked.json");
//! let revision = remote.push(Path::new("models/classifier.json"))?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod remote;
mod store;
mod table;

pub use hash::{ContentHash, HashError, Revision};
pub use remote::{LocalRemote, RemoteStore, TrackedEntry};
pub use store::{ArtifactStore, BackupRecord, Fingerprint, StoreError};
pub use table::{Table, TableError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
