//! Durable record of completed items.
//!
//! The checkpoint is a JSON document keyed by relative path. It is only ever
//! replaced atomically (temporary file, fsync, rename) and the previous good
//! version is kept next to it as `<checkpoint>.bak`.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// Format version written to new checkpoints.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Recorded outcome of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Copied and verified.
    Done,
    /// Retries exhausted.
    Failed,
}

/// One checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEntry {
    /// Outcome.
    pub status: EntryStatus,
    /// Verified checksum, required for `Done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Object size in bytes.
    pub size: u64,
    /// Unix seconds of the last update.
    pub updated_at: u64,
    /// Last error, for `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    version: u32,
    source: String,
    destination: String,
    #[serde(default)]
    entries: BTreeMap<String, CheckpointEntry>,
}

/// In-memory checkpoint state bound to a file.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    file: CheckpointFile,
    dirty: bool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl Checkpoint {
    /// Load the checkpoint at `path`, or start an empty one if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Checkpoint file
    /// * `source` - Descriptor of the source store
    /// * `destination` - Descriptor of the destination store
    ///
    /// # Errors
    ///
    /// * `CheckpointCorruption` if the file cannot be read, parsed or trusted
    /// * `CheckpointMismatch` if it was written for other stores
    pub fn load_or_new(
        path: &Path,
        source: &str,
        destination: &str,
    ) -> Result<Self, EngineError> {
        let corrupt = |message: String| EngineError::CheckpointCorruption {
            path: path.to_path_buf(),
            message,
        };

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No checkpoint at {}, starting fresh", path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    file: CheckpointFile {
                        version: CHECKPOINT_VERSION,
                        source: source.to_string(),
                        destination: destination.to_string(),
                        entries: BTreeMap::new(),
                    },
                    dirty: false,
                });
            }
            Err(e) => return Err(corrupt(e.to_string())),
        };

        let file: CheckpointFile =
            serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;

        if file.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!("unsupported version {}", file.version)));
        }
        if let Some((item, _)) = file
            .entries
            .iter()
            .find(|(_, e)| e.status == EntryStatus::Done && e.checksum.is_none())
        {
            return Err(corrupt(format!("done entry '{item}' has no checksum")));
        }
        if file.source != source || file.destination != destination {
            return Err(EngineError::CheckpointMismatch {
                path: path.to_path_buf(),
                found_source: file.source,
                found_destination: file.destination,
            });
        }

        log::debug!(
            "Loaded checkpoint {} with {} entries",
            path.display(),
            file.entries.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            dirty: false,
        })
    }

    /// Checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths recorded as `Done`.
    #[must_use]
    pub fn done_paths(&self) -> HashSet<String> {
        self.file
            .entries
            .iter()
            .filter(|(_, e)| e.status == EntryStatus::Done)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Record for `path`.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&CheckpointEntry> {
        self.file.entries.get(path)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.file.entries.len()
    }

    /// Whether there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file.entries.is_empty()
    }

    /// Whether there are unflushed changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark `path` as fully transferred and verified.
    pub fn record_done(&mut self, path: &str, size: u64, checksum: String) {
        self.file.entries.insert(
            path.to_string(),
            CheckpointEntry {
                status: EntryStatus::Done,
                checksum: Some(checksum),
                size,
                updated_at: unix_now(),
                error: None,
            },
        );
        self.dirty = true;
    }

    /// Mark `path` as failed after exhausting retries.
    pub fn record_failed(&mut self, path: &str, size: u64, error: String) {
        self.file.entries.insert(
            path.to_string(),
            CheckpointEntry {
                status: EntryStatus::Failed,
                checksum: None,
                size,
                updated_at: unix_now(),
                error: Some(error),
            },
        );
        self.dirty = true;
    }

    /// Forget any record for `path`, e.g. when verification found it stale.
    pub fn reopen(&mut self, path: &str) {
        if self.file.entries.remove(path).is_some() {
            self.dirty = true;
        }
    }

    /// Persist pending changes. Does nothing when clean.
    ///
    /// # Errors
    ///
    /// * `CheckpointWrite` once `retry` is exhausted
    pub fn flush(&mut self, retry: &RetryPolicy) -> Result<(), EngineError> {
        if !self.dirty {
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&self.file).map_err(|e| {
            EngineError::CheckpointWrite {
                path: self.path.clone(),
                source: io::Error::other(e),
            }
        })?;

        // A fresh token: the final flush must still happen after a stop signal.
        retry
            .run(
                &CancelToken::new(),
                |_| write_atomic(&self.path, &bytes, true),
                |_| true,
            )
            .map_err(|(source, attempts)| {
                log::warn!(
                    "Checkpoint {} not written after {attempts} attempt(s)",
                    self.path.display()
                );
                EngineError::CheckpointWrite {
                    path: self.path.clone(),
                    source,
                }
            })?;

        self.dirty = false;
        log::debug!(
            "Flushed checkpoint {} ({} entries)",
            self.path.display(),
            self.file.entries.len()
        );
        Ok(())
    }
}

/// Path of the backup kept beside `path`.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Replace `path` with `bytes` atomically, optionally keeping the old file as `.bak`.
///
/// # Errors
///
/// * If any filesystem step fails; a half-written temporary file is removed
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], backup: bool) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        name.to_string_lossy(),
        std::process::id()
    ));

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        if backup && path.exists() {
            fs::copy(path, backup_path(path))?;
        }
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}
