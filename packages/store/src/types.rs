//! The remote store contract.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use crate::error::StoreError;

/// One object reported by a store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the store root, `/`-separated, no leading slash.
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Hex SHA-256 digest, if the store can report it without reading the object.
    pub checksum: Option<String>,
}

impl RemoteEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(path: impl Into<String>, size: u64, checksum: Option<String>) -> Self {
        Self {
            path: path.into(),
            size,
            checksum,
        }
    }
}

/// A chunked read stream over one object.
pub trait ObjectStream: Send {
    /// Fill `buf` with the next bytes of the object.
    ///
    /// Returns the number of bytes read; `0` means end of object.
    ///
    /// # Errors
    ///
    /// * If the store fails to deliver the next chunk
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;
}

/// A write sink for one object.
///
/// Nothing becomes visible at the destination path until [`ObjectSink::commit`]
/// succeeds. Dropping a sink without committing discards everything written.
pub trait ObjectSink: Send {
    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// * If the store rejects the write
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), StoreError>;

    /// Publish the object.
    ///
    /// Returns the checksum of the stored bytes when the store computes one.
    ///
    /// # Errors
    ///
    /// * If the object cannot be published
    fn commit(self: Box<Self>) -> Result<Option<String>, StoreError>;
}

/// An object store the replication engine can read from or write to.
pub trait RemoteStore: Send + Sync {
    /// Human-readable descriptor of the store (used in logs and checkpoints).
    fn describe(&self) -> String;

    /// List every object below `prefix` (empty for the whole store).
    ///
    /// # Errors
    ///
    /// * If the listing cannot be completed
    fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, StoreError>;

    /// Open a read stream for `path`.
    ///
    /// # Errors
    ///
    /// * If the object does not exist or cannot be opened
    fn open_read(&self, path: &str) -> Result<Box<dyn ObjectStream>, StoreError>;

    /// Open a write sink for `path`, replacing any existing object on commit.
    ///
    /// # Errors
    ///
    /// * If the sink cannot be created
    fn open_write(&self, path: &str) -> Result<Box<dyn ObjectSink>, StoreError>;

    /// Metadata for a single object, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// * If the store cannot be queried
    fn metadata(&self, path: &str) -> Result<Option<RemoteEntry>, StoreError>;
}

/// Join a prefix and a relative path with a single `/`.
#[must_use]
pub fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}
