//! Progress counters and checkpoint bookkeeping for one run.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::time::{Duration, Instant};

use crate::checkpoint::{Checkpoint, EntryStatus};
use crate::error::{EngineError, WorkerError};
use crate::item::WorkItem;
use crate::report::{FailedItem, RunSummary};
use crate::retry::RetryPolicy;

/// Point-in-time view of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes copied and verified.
    pub bytes_transferred: u64,
    /// Bytes of every item discovered so far.
    pub bytes_total: u64,
    /// Items discovered so far.
    pub items_total: u64,
    /// Items copied and verified.
    pub items_done: u64,
    /// Items that exhausted their retries.
    pub items_failed: u64,
    /// Items a dry run would copy.
    pub items_would_transfer: u64,
    /// Items not yet finished.
    pub items_remaining: u64,
    /// Identical objects.
    pub items_skipped: u64,
    /// Objects completed by an earlier run.
    pub items_resumed: u64,
    /// Excluded objects.
    pub items_excluded: u64,
    /// Attempts that were requeued.
    pub retries: u64,
    /// Workers currently moving bytes.
    pub active_workers: usize,
    /// Whether the diff has finished.
    pub listing_complete: bool,
}

/// When and how the checkpoint is flushed.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    /// Write the checkpoint at all. Off for dry runs.
    pub persist: bool,
    /// Flush after this many recorded outcomes.
    pub every: u64,
    /// Flush at least this often while outcomes are pending.
    pub interval: Duration,
    /// Retry policy for each flush.
    pub retry: RetryPolicy,
}

/// Owns the checkpoint and the counters of a run.
#[derive(Debug)]
pub struct Tracker {
    checkpoint: Checkpoint,
    policy: FlushPolicy,
    unflushed: u64,
    last_flush: Instant,
    snapshot: ProgressSnapshot,
    done: Vec<String>,
    failed: Vec<FailedItem>,
    would_transfer: Vec<String>,
}

impl Tracker {
    /// Start tracking against `checkpoint`.
    #[must_use]
    pub fn new(checkpoint: Checkpoint, policy: FlushPolicy) -> Self {
        Self {
            checkpoint,
            policy,
            unflushed: 0,
            last_flush: Instant::now(),
            snapshot: ProgressSnapshot::default(),
            done: Vec::new(),
            failed: Vec::new(),
            would_transfer: Vec::new(),
        }
    }

    /// The checkpoint being maintained.
    #[must_use]
    pub const fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// A new item entered the queue.
    ///
    /// A `Done` record for it is stale (verification found a difference) and is
    /// dropped so a crash cannot resurrect it.
    pub fn discovered(&mut self, item: &WorkItem) {
        if self
            .checkpoint
            .entry(&item.path)
            .is_some_and(|e| e.status == EntryStatus::Done)
        {
            log::debug!("Checkpoint entry for {} is stale", item.path);
            self.checkpoint.reopen(&item.path);
        }
        self.snapshot.items_total += 1;
        self.snapshot.items_remaining += 1;
        self.snapshot.bytes_total += item.size;
    }

    /// An object is identical at the destination.
    pub const fn unchanged(&mut self) {
        self.snapshot.items_skipped += 1;
    }

    /// An object was completed by an earlier run.
    pub const fn resumed(&mut self) {
        self.snapshot.items_resumed += 1;
    }

    /// An object matched an exclusion pattern.
    pub const fn excluded(&mut self) {
        self.snapshot.items_excluded += 1;
    }

    /// The diff finished.
    pub const fn listing_complete(&mut self) {
        self.snapshot.listing_complete = true;
    }

    /// Current number of busy workers.
    pub const fn set_active_workers(&mut self, active: usize) {
        self.snapshot.active_workers = active;
    }

    /// An attempt failed and the item was requeued.
    pub fn retried(&mut self, item: &WorkItem, error: &WorkerError) {
        log::debug!(
            "Retrying {} after attempt {}: {error}",
            item.path,
            item.attempts
        );
        self.snapshot.retries += 1;
    }

    /// An item was copied and verified.
    pub fn completed(&mut self, item: &WorkItem, bytes: u64, checksum: String) {
        self.checkpoint.record_done(&item.path, item.size, checksum);
        self.done.push(item.path.clone());
        self.snapshot.items_done += 1;
        self.snapshot.items_remaining = self.snapshot.items_remaining.saturating_sub(1);
        self.snapshot.bytes_transferred += bytes;
        self.unflushed += 1;
    }

    /// A dry run would copy an item.
    pub fn would_transfer(&mut self, item: &WorkItem) {
        self.would_transfer.push(item.path.clone());
        self.snapshot.items_would_transfer += 1;
        self.snapshot.items_remaining = self.snapshot.items_remaining.saturating_sub(1);
    }

    /// An item exhausted its retries.
    pub fn failed(&mut self, item: &WorkItem, error: &WorkerError) {
        log::warn!(
            "Giving up on {} after {} attempt(s): {error}",
            item.path,
            item.attempts
        );
        self.checkpoint
            .record_failed(&item.path, item.size, error.to_string());
        self.failed.push(FailedItem {
            path: item.path.clone(),
            attempts: item.attempts,
            error: error.to_string(),
        });
        self.snapshot.items_failed += 1;
        self.snapshot.items_remaining = self.snapshot.items_remaining.saturating_sub(1);
        self.unflushed += 1;
    }

    /// Flush if enough outcomes piled up or the interval elapsed.
    ///
    /// # Errors
    ///
    /// * `CheckpointWrite` if the flush fails
    pub fn maybe_flush(&mut self) -> Result<(), EngineError> {
        let due = self.unflushed >= self.policy.every
            || (self.checkpoint.is_dirty() && self.last_flush.elapsed() >= self.policy.interval);
        if due {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush unconditionally (a no-op when nothing changed).
    ///
    /// # Errors
    ///
    /// * `CheckpointWrite` if the flush fails
    pub fn flush(&mut self) -> Result<(), EngineError> {
        if self.policy.persist {
            self.checkpoint.flush(&self.policy.retry)?;
        }
        self.unflushed = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Current counters.
    #[must_use]
    pub const fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }

    /// Final summary of the run.
    #[must_use]
    pub fn into_summary(
        mut self,
        source: String,
        destination: String,
        elapsed: Duration,
        interrupted: bool,
    ) -> RunSummary {
        self.done.sort();
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
        self.would_transfer.sort();

        RunSummary {
            source,
            destination,
            dry_run: !self.policy.persist,
            done: self.done,
            failed: self.failed,
            would_transfer: self.would_transfer,
            skipped: self.snapshot.items_skipped,
            resumed: self.snapshot.items_resumed,
            excluded: self.snapshot.items_excluded,
            pending: self.snapshot.items_remaining,
            bytes_transferred: self.snapshot.bytes_transferred,
            elapsed,
            interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::DiffReason;
    use std::path::Path;
    use tempfile::TempDir;
    use treemirror_store::StoreError;

    fn tracker(path: &Path, persist: bool, every: u64) -> Tracker {
        let checkpoint = Checkpoint::load_or_new(path, "memory:src", "memory:dst").unwrap();
        Tracker::new(
            checkpoint,
            FlushPolicy {
                persist,
                every,
                interval: Duration::from_secs(3600),
                retry: RetryPolicy::once(),
            },
        )
    }

    fn item(path: &str, size: u64) -> WorkItem {
        let mut item = WorkItem::new(path, size, None, DiffReason::Missing);
        item.attempts = 1;
        item
    }

    fn denied(path: &str) -> WorkerError {
        WorkerError::Store(StoreError::Permanent {
            path: path.to_string(),
            message: "denied".to_string(),
        })
    }

    #[test]
    fn test_counts_are_conserved() {
        let temp = TempDir::new().unwrap();
        let mut tracker = tracker(&temp.path().join("cp.json"), true, 100);
        let (a, b, c) = (item("a", 1), item("b", 2), item("c", 3));
        for item in [&a, &b, &c] {
            tracker.discovered(item);
        }

        tracker.completed(&a, 1, "x".to_string());
        tracker.failed(&b, &denied("b"));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.items_total, 3);
        assert_eq!(snapshot.bytes_total, 6);
        assert_eq!(
            snapshot.items_done + snapshot.items_failed + snapshot.items_remaining,
            snapshot.items_total
        );

        let summary = tracker.into_summary(
            "memory:src".to_string(),
            "memory:dst".to_string(),
            Duration::ZERO,
            true,
        );
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.failed[0].path, "b");
    }

    #[test]
    fn test_flushes_every_n_outcomes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let mut tracker = tracker(&path, true, 2);

        tracker.completed(&item("a", 1), 1, "x".to_string());
        tracker.maybe_flush().unwrap();
        assert!(!path.exists());

        tracker.completed(&item("b", 1), 1, "y".to_string());
        tracker.maybe_flush().unwrap();
        assert!(path.exists());
        assert!(!tracker.checkpoint().is_dirty());
    }

    #[test]
    fn test_dry_run_never_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let mut tracker = tracker(&path, false, 1);

        tracker.would_transfer(&item("a", 1));
        tracker.flush().unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_rediscovered_done_entry_is_reopened() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let mut tracker = tracker(&path, true, 100);
        tracker.completed(&item("a", 1), 1, "x".to_string());

        tracker.discovered(&item("a", 1));

        assert!(tracker.checkpoint().done_paths().is_empty());
    }
}
