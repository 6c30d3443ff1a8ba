//! Work items produced by the manifest diff.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Lifecycle of a work item.
///
/// `Pending -> InFlight -> Done | Failed`. A failed item is requeued as
/// `Pending` until the transfer retry policy is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Owned by a worker.
    InFlight,
    /// Copied and verified.
    Done,
    /// The last attempt failed.
    Failed,
    /// Dry run: would have been copied.
    WouldTransfer,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InFlight => write!(f, "in-flight"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::WouldTransfer => write!(f, "would-transfer"),
        }
    }
}

/// Why an object is part of the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffReason {
    /// Absent at the destination.
    Missing,
    /// Present with a different size.
    SizeChanged,
    /// Present with the same size but different contents.
    ChecksumChanged,
    /// Present, but one side could not be checksummed.
    Unverified,
}

impl std::fmt::Display for DiffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::SizeChanged => write!(f, "size changed"),
            Self::ChecksumChanged => write!(f, "checksum changed"),
            Self::Unverified => write!(f, "unverified"),
        }
    }
}

/// One object to copy from source to destination. Identity is `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Path relative to both store roots.
    pub path: String,
    /// Source size in bytes.
    pub size: u64,
    /// Source checksum, fetched lazily when the listing did not carry one.
    pub source_checksum: Option<String>,
    /// Current status.
    pub status: ItemStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Why the item is in the diff.
    pub reason: DiffReason,
}

impl WorkItem {
    /// A fresh `Pending` item.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        size: u64,
        source_checksum: Option<String>,
        reason: DiffReason,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            source_checksum,
            status: ItemStatus::Pending,
            attempts: 0,
            reason,
        }
    }
}
