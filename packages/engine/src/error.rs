//! Error types for the replication engine.
//!
//! [`EngineError`] covers structural failures that abort a whole run.
//! [`WorkerError`] covers per-item failures, which are retried or recorded
//! against the item while the run continues.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use treemirror_config::ConfigError;
use treemirror_store::StoreError;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A tree could not be enumerated. A partial listing would produce a wrong diff.
    #[error("Failed to list {store} under '{prefix}' after {attempts} attempt(s): {source}")]
    ListingFailure {
        /// Store descriptor.
        store: String,
        /// Sub-path being listed.
        prefix: String,
        /// Attempts made.
        attempts: u32,
        /// The last store error.
        #[source]
        source: StoreError,
    },

    /// The checkpoint exists but cannot be trusted.
    #[error(
        "Checkpoint {} is unreadable: {message}. Delete it to start fresh or restore {}.bak",
        path.display(),
        path.display()
    )]
    CheckpointCorruption {
        /// Checkpoint file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// The checkpoint was written for a different source/destination pair.
    #[error(
        "Checkpoint {} belongs to a different run ({found_source} -> {found_destination})",
        path.display()
    )]
    CheckpointMismatch {
        /// Checkpoint file.
        path: PathBuf,
        /// Source recorded in the checkpoint.
        found_source: String,
        /// Destination recorded in the checkpoint.
        found_destination: String,
    },

    /// The checkpoint could not be persisted.
    #[error("Failed to write checkpoint {}: {source}", path.display())]
    CheckpointWrite {
        /// Checkpoint file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The run report could not be written.
    #[error("Failed to write report {}: {source}", path.display())]
    ReportWrite {
        /// Report file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The diff was stopped before it covered every object.
    #[error("Diff interrupted before completion")]
    Interrupted,

    /// Settings are unusable.
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    /// A worker pool could not be started.
    #[error("Failed to start {pool} pool: {source}")]
    ThreadPool {
        /// Pool name.
        pool: &'static str,
        /// The underlying rayon error.
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

/// Errors from transferring a single item.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The source or destination store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The bytes do not hash to the source checksum.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Object path.
        path: String,
        /// Source checksum.
        expected: String,
        /// Checksum of the transferred bytes.
        actual: String,
    },

    /// The number of bytes copied differs from the listed size.
    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Object path.
        path: String,
        /// Listed size.
        expected: u64,
        /// Bytes observed.
        actual: u64,
    },

    /// A single chunk read or write took longer than the IO timeout.
    #[error("Chunk {operation} of {path} exceeded {timeout:?}")]
    Timeout {
        /// Object path.
        path: String,
        /// `read` or `write`.
        operation: &'static str,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The run is stopping.
    #[error("Transfer of {path} was cancelled")]
    Cancelled {
        /// Object path.
        path: String,
    },
}

impl WorkerError {
    /// Whether a fresh attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::ChecksumMismatch { .. } | Self::SizeMismatch { .. } | Self::Timeout { .. } => {
                true
            }
            Self::Cancelled { .. } => false,
        }
    }
}
