//! Resumable, rate-limited, multi-worker tree replication.
//!
//! This crate copies every object that differs between two
//! [`RemoteStore`](treemirror_store::RemoteStore)s:
//!
//! * [`ManifestBuilder`] lists both trees and diffs them
//! * [`Scheduler`] dispatches the diff to a bounded pool of [`Worker`]s
//! * [`TransferBudget`] caps the combined bandwidth of all workers
//! * [`Checkpoint`] records verified items so an interrupted run can resume
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use treemirror_engine::{CancelToken, RunOptions, Scheduler};
//! use treemirror_store::LocalStore;
//!
//! let options = RunOptions::from_config(&config, false, false)?;
//! let scheduler = Scheduler::new(
//!     Arc::new(LocalStore::new("/mnt/old")),
//!     Arc::new(LocalStore::new("/mnt/new")),
//!     options,
//!     CancelToken::new(),
//! );
//!
//! let summary = scheduler.run(|progress| {
//!     println!("{}/{} bytes", progress.bytes_transferred, progress.bytes_total);
//! })?;
//! std::process::exit(summary.exit_code());
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod budget;
mod cancel;
mod checkpoint;
mod error;
mod io;
mod item;
mod manifest;
mod report;
mod retry;
mod scheduler;
mod tracker;
mod worker;

pub use budget::{ActiveWorker, TransferBudget};
pub use cancel::CancelToken;
pub use checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, CheckpointEntry, EntryStatus, backup_path,
};
pub use error::{EngineError, WorkerError};
pub use item::{DiffReason, ItemStatus, WorkItem};
pub use manifest::{Manifest, ManifestBuilder, ManifestEntry, ManifestStats};
pub use report::{FailedItem, RunStatus, RunSummary, write_csv_report, write_report};
pub use retry::RetryPolicy;
pub use scheduler::{RunOptions, Scheduler};
pub use tracker::{FlushPolicy, ProgressSnapshot, Tracker};
pub use worker::{TransferOutcome, Worker, WorkerSettings};
