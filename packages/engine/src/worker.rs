//! Copies one work item from source to destination.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::time::Duration;

use treemirror_store::{ChecksumHasher, RemoteStore};

use crate::budget::TransferBudget;
use crate::cancel::CancelToken;
use crate::error::WorkerError;
use crate::io::{ChunkReader, ChunkWriter, IoGuard, budgeted_checksum};
use crate::item::{ItemStatus, WorkItem};

/// Per-worker knobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Bytes per chunk read/write.
    pub chunk_size: usize,
    /// Longest a single store call may block before the attempt times out.
    pub io_timeout: Duration,
    /// Log instead of writing.
    pub dry_run: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            io_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// Successful result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The object was copied and verified.
    Transferred {
        /// Bytes copied.
        bytes: u64,
        /// Verified checksum of the stored object.
        checksum: String,
    },
    /// Dry run: nothing was written.
    WouldTransfer,
}

/// Streams objects between two stores under a shared bandwidth budget.
#[derive(Clone)]
pub struct Worker {
    source: Arc<dyn RemoteStore>,
    destination: Arc<dyn RemoteStore>,
    budget: Arc<TransferBudget>,
    cancel: CancelToken,
    settings: WorkerSettings,
}

impl Worker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        source: Arc<dyn RemoteStore>,
        destination: Arc<dyn RemoteStore>,
        budget: Arc<TransferBudget>,
        cancel: CancelToken,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            source,
            destination,
            budget,
            cancel,
            settings,
        }
    }

    /// Make one attempt at `item`.
    ///
    /// The returned item has its attempt count incremented and its status set
    /// from the outcome: `Done`, `WouldTransfer`, `Failed`, or `Pending` again
    /// if the attempt was cancelled.
    #[must_use]
    pub fn run(&self, mut item: WorkItem) -> (WorkItem, Result<TransferOutcome, WorkerError>) {
        item.attempts += 1;
        item.status = ItemStatus::InFlight;

        let result = if self.settings.dry_run {
            log::info!(
                "Would transfer {} ({} bytes, {})",
                item.path,
                item.size,
                item.reason
            );
            Ok(TransferOutcome::WouldTransfer)
        } else {
            let _active = self.budget.enter();
            self.transfer(&mut item)
        };

        item.status = match &result {
            Ok(TransferOutcome::Transferred { .. }) => ItemStatus::Done,
            Ok(TransferOutcome::WouldTransfer) => ItemStatus::WouldTransfer,
            Err(WorkerError::Cancelled { .. }) => ItemStatus::Pending,
            Err(_) => ItemStatus::Failed,
        };

        (item, result)
    }

    fn transfer(&self, item: &mut WorkItem) -> Result<TransferOutcome, WorkerError> {
        let path = item.path.clone();
        let cancelled = || WorkerError::Cancelled { path: path.clone() };
        let guard = IoGuard::new(self.settings.io_timeout, self.cancel.clone());

        log::debug!(
            "Transferring {path} ({} bytes, attempt {})",
            item.size,
            item.attempts
        );

        let mut reader = ChunkReader::open(&self.source, &path, self.settings.chunk_size, &guard)?;
        let mut writer = ChunkWriter::open(&self.destination, &path, &guard)?;
        let mut hasher = ChecksumHasher::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            let chunk = reader.next_chunk()?;
            if chunk.is_empty() {
                break;
            }

            if !self.budget.acquire(chunk.len(), &self.cancel) {
                return Err(cancelled());
            }

            hasher.update(&chunk);
            writer.write(chunk)?;
        }
        drop(reader);

        let bytes = hasher.bytes();
        if bytes != item.size {
            return Err(WorkerError::SizeMismatch {
                path,
                expected: item.size,
                actual: bytes,
            });
        }

        let streamed = hasher.finish();
        if let Some(expected) = item.source_checksum.as_ref().filter(|c| **c != streamed) {
            return Err(WorkerError::ChecksumMismatch {
                path,
                expected: expected.clone(),
                actual: streamed,
            });
        }

        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        let stored = match writer.commit()? {
            Some(checksum) => checksum,
            None => budgeted_checksum(
                &self.destination,
                &path,
                &self.budget,
                self.settings.chunk_size,
                &guard,
            )?,
        };
        if stored != streamed {
            return Err(WorkerError::ChecksumMismatch {
                path,
                expected: streamed,
                actual: stored,
            });
        }

        let destination = Arc::clone(&self.destination);
        let target = path.clone();
        match guard.call(&path, "metadata", move || destination.metadata(&target))? {
            Some(entry) if entry.size == bytes => {}
            Some(entry) => {
                return Err(WorkerError::SizeMismatch {
                    path,
                    expected: bytes,
                    actual: entry.size,
                });
            }
            None => {
                return Err(WorkerError::SizeMismatch {
                    path,
                    expected: bytes,
                    actual: 0,
                });
            }
        }

        item.source_checksum.get_or_insert_with(|| streamed.clone());
        log::debug!("Transferred {path} ({bytes} bytes)");

        Ok(TransferOutcome::Transferred {
            bytes,
            checksum: stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::DiffReason;
    use std::time::Instant;
    use tempfile::TempDir;
    use treemirror_store::{
        FailureKind, Fault, LocalStore, MemoryStore, StoreError, checksum_bytes,
    };

    fn worker(
        source: &MemoryStore,
        destination: &MemoryStore,
        settings: WorkerSettings,
    ) -> Worker {
        Worker::new(
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
            Arc::new(TransferBudget::unlimited()),
            CancelToken::new(),
            settings,
        )
    }

    fn small_chunks() -> WorkerSettings {
        WorkerSettings {
            chunk_size: 4,
            ..WorkerSettings::default()
        }
    }

    fn item(path: &str, data: &[u8]) -> WorkItem {
        WorkItem::new(
            path,
            data.len() as u64,
            Some(checksum_bytes(data)),
            DiffReason::Missing,
        )
    }

    #[test]
    fn test_copies_in_chunks_and_verifies() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "0123456789");

        let worker = worker(&source, &destination, small_chunks());

        let (item, result) = worker.run(item("a.bin", b"0123456789"));

        assert_eq!(
            result.unwrap(),
            TransferOutcome::Transferred {
                bytes: 10,
                checksum: checksum_bytes(b"0123456789"),
            }
        );
        assert_eq!(item.status, ItemStatus::Done);
        assert_eq!(item.attempts, 1);
        assert_eq!(destination.get("a.bin").unwrap(), b"0123456789");
    }

    #[test]
    fn test_dry_run_opens_nothing() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "data");
        let settings = WorkerSettings {
            dry_run: true,
            ..WorkerSettings::default()
        };

        let worker = worker(&source, &destination, settings);

        let (item, result) = worker.run(item("a.bin", b"data"));

        assert_eq!(result.unwrap(), TransferOutcome::WouldTransfer);
        assert_eq!(item.status, ItemStatus::WouldTransfer);
        assert_eq!(source.reads("a.bin"), 0);
        assert_eq!(destination.write_opens(), 0);
    }

    #[test]
    fn test_corruption_in_transit_is_a_retryable_mismatch() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "payload");
        destination.inject(Fault::CorruptWrite {
            path: "a.bin".to_string(),
            times: 1,
        });

        let worker = worker(&source, &destination, small_chunks());

        let (item, result) = worker.run(item("a.bin", b"payload"));

        let error = result.unwrap_err();
        assert!(matches!(error, WorkerError::ChecksumMismatch { .. }));
        assert!(error.is_retryable());
        assert_eq!(item.status, ItemStatus::Failed);
    }

    #[test]
    fn test_stale_source_checksum_is_never_committed() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "new!");
        let stale = WorkItem::new(
            "a.bin",
            4,
            Some(checksum_bytes(b"old!")),
            DiffReason::Missing,
        );

        let worker = worker(&source, &destination, small_chunks());

        let (_, result) = worker.run(stale);

        assert!(matches!(result, Err(WorkerError::ChecksumMismatch { .. })));
        assert_eq!(destination.commits(), 0);
        assert!(destination.get("a.bin").is_none());
    }

    #[test]
    fn test_size_change_is_detected() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "grown since listing");
        let listed = WorkItem::new("a.bin", 5, None, DiffReason::Missing);

        let worker = worker(&source, &destination, small_chunks());

        let (_, result) = worker.run(listed);

        assert!(matches!(
            result,
            Err(WorkerError::SizeMismatch { expected: 5, .. })
        ));
        assert_eq!(destination.commits(), 0);
    }

    #[test]
    fn test_permanent_read_failure_is_not_retryable() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "data");
        source.inject(Fault::ReadFailure {
            path: "a.bin".to_string(),
            kind: FailureKind::Permanent,
            times: 1,
        });

        let worker = worker(&source, &destination, small_chunks());

        let (item, result) = worker.run(item("a.bin", b"data"));

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            WorkerError::Store(StoreError::Permanent { .. })
        ));
        assert!(!error.is_retryable());
        assert_eq!(item.status, ItemStatus::Failed);
    }

    #[test]
    fn test_stuck_chunk_times_out_at_the_deadline() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "data");
        source.inject(Fault::SlowRead {
            path: "a.bin".to_string(),
            delay: Duration::from_secs(3),
        });
        let settings = WorkerSettings {
            io_timeout: Duration::from_millis(100),
            ..small_chunks()
        };

        let worker = worker(&source, &destination, settings);

        let started = Instant::now();
        let (item, result) = worker.run(item("a.bin", b"data"));

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            WorkerError::Timeout {
                operation: "read",
                ..
            }
        ));
        assert!(error.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(destination.commits(), 0);
    }

    #[test]
    fn test_stop_abandons_a_stuck_chunk() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "data");
        source.inject(Fault::SlowRead {
            path: "a.bin".to_string(),
            delay: Duration::from_secs(3),
        });
        let cancel = CancelToken::new();
        let worker = Worker::new(
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
            Arc::new(TransferBudget::unlimited()),
            cancel.clone(),
            small_chunks(),
        );

        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let started = Instant::now();
        let (item, result) = worker.run(item("a.bin", b"data"));

        assert!(matches!(result, Err(WorkerError::Cancelled { .. })));
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_verification_read_is_budgeted() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst").without_commit_checksums();
        source.insert("a.bin", vec![3u8; 100]);
        let budget = Arc::new(TransferBudget::new(Some(1_000_000), 10));
        let worker = Worker::new(
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
            Arc::clone(&budget),
            CancelToken::new(),
            WorkerSettings {
                chunk_size: 10,
                ..WorkerSettings::default()
            },
        );

        let (_, result) = worker.run(item("a.bin", &[3u8; 100]));

        assert_eq!(
            result.unwrap(),
            TransferOutcome::Transferred {
                bytes: 100,
                checksum: checksum_bytes(&[3u8; 100]),
            }
        );
        // The copy and the read-back of the stored object.
        assert_eq!(budget.consumed(), 200);
        assert_eq!(destination.reads("a.bin"), 1);
    }

    #[test]
    fn test_cancelled_attempt_returns_to_pending() {
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a.bin", "data");
        let cancel = CancelToken::new();
        cancel.cancel();
        let worker = Worker::new(
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
            Arc::new(TransferBudget::unlimited()),
            cancel,
            small_chunks(),
        );

        let (item, result) = worker.run(item("a.bin", b"data"));

        assert!(matches!(result, Err(WorkerError::Cancelled { .. })));
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(destination.get("a.bin").is_none());
    }

    #[test]
    fn test_local_to_local() {
        let temp = TempDir::new().unwrap();
        let source_root = temp.path().join("src");
        std::fs::create_dir_all(source_root.join("nested")).unwrap();
        std::fs::write(source_root.join("nested/file.txt"), "local bytes").unwrap();

        let worker = Worker::new(
            Arc::new(LocalStore::new(&source_root)),
            Arc::new(LocalStore::new(temp.path().join("dst"))),
            Arc::new(TransferBudget::unlimited()),
            CancelToken::new(),
            small_chunks(),
        );
        let work = WorkItem::new("nested/file.txt", 11, None, DiffReason::Missing);

        let (item, result) = worker.run(work);

        assert!(result.is_ok());
        assert_eq!(item.source_checksum, Some(checksum_bytes(b"local bytes")));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("dst/nested/file.txt")).unwrap(),
            "local bytes"
        );
    }
}
