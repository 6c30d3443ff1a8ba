//! Transfer scheduling.
//!
//! The scheduler owns one run. It streams the manifest from the checker pool,
//! hands work items to at most `transfers` workers on the transfer pool, and
//! applies every outcome to the [`Tracker`] on a single thread. Rules it
//! enforces:
//!
//! * A path is never in flight on two workers at once
//! * Retryable failures are requeued with backoff until the transfer retry
//!   policy is exhausted; anything else is recorded as failed
//! * Only fully verified items reach the checkpoint
//! * On a stop signal, no new work is dispatched, in-flight workers abort at
//!   their next chunk and the checkpoint is flushed before returning

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use treemirror_config::Config;
use treemirror_filter::ExcludeFilter;
use treemirror_store::RemoteStore;

use crate::budget::TransferBudget;
use crate::cancel::CancelToken;
use crate::checkpoint::Checkpoint;
use crate::error::{EngineError, WorkerError};
use crate::item::{ItemStatus, WorkItem};
use crate::manifest::{ManifestBuilder, ManifestEntry, ManifestStats};
use crate::report::RunSummary;
use crate::retry::RetryPolicy;
use crate::tracker::{FlushPolicy, ProgressSnapshot, Tracker};
use crate::worker::{TransferOutcome, Worker, WorkerSettings};

/// Longest the event loop sleeps between checks.
const TICK: Duration = Duration::from_millis(50);

/// Everything a run needs besides the two stores.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Concurrent transfer workers.
    pub transfers: usize,
    /// Concurrent listing/metadata checkers.
    pub checkers: usize,
    /// Bandwidth ceiling in bytes per second.
    pub bandwidth: Option<u64>,
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Log intended transfers without writing anything.
    pub dry_run: bool,
    /// Re-compare items the checkpoint marks as done.
    pub verify: bool,
    /// Per-chunk IO timeout.
    pub io_timeout: Duration,
    /// Retry policy for listings.
    pub listing_retry: RetryPolicy,
    /// Retry policy for item transfers.
    pub transfer_retry: RetryPolicy,
    /// Retry policy for checkpoint writes.
    pub checkpoint_retry: RetryPolicy,
    /// Checkpoint flush interval.
    pub flush_interval: Duration,
    /// Checkpoint flush batch size.
    pub flush_every: u64,
    /// Checkpoint file.
    pub checkpoint_path: PathBuf,
    /// Sub-paths to replicate.
    pub roots: Vec<String>,
    /// Exclusion patterns.
    pub exclude: ExcludeFilter,
    /// Case-insensitive destination matching.
    pub case_insensitive: bool,
}

impl RunOptions {
    /// Build options from a validated configuration.
    ///
    /// # Errors
    ///
    /// * `Configuration` if any setting is invalid
    pub fn from_config(
        config: &Config,
        dry_run: bool,
        verify: bool,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(Self {
            transfers: config.transfers,
            checkers: config.checkers,
            bandwidth: config.bandwidth_limit()?,
            chunk_size: config.chunk_size_bytes()?,
            dry_run,
            verify,
            io_timeout: config.io_timeout(),
            listing_retry: RetryPolicy::from(&config.retry.listing),
            transfer_retry: RetryPolicy::from(&config.retry.transfer),
            checkpoint_retry: RetryPolicy::from(&config.retry.checkpoint),
            flush_interval: config.flush_interval(),
            flush_every: config.flush_every,
            checkpoint_path: config.checkpoint.clone(),
            roots: config.roots.clone(),
            exclude: config.exclude_filter()?,
            case_insensitive: config.case_insensitive,
        })
    }
}

enum Event {
    Manifest(ManifestEntry),
    ManifestDone(Result<ManifestStats, EngineError>),
    Finished(WorkItem, Result<TransferOutcome, WorkerError>),
}

/// Items waiting for a worker.
#[derive(Debug, Default)]
struct DispatchQueue {
    ready: VecDeque<WorkItem>,
    delayed: Vec<(Instant, WorkItem)>,
    in_flight: HashSet<String>,
}

impl DispatchQueue {
    fn push(&mut self, item: WorkItem) {
        self.ready.push_back(item);
    }

    fn push_delayed(&mut self, item: WorkItem, due: Instant) {
        self.delayed.push((due, item));
    }

    fn promote_due(&mut self, now: Instant) {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = waiting;
        self.ready.extend(due.into_iter().map(|(_, item)| item));
    }

    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        self.delayed
            .iter()
            .map(|(at, _)| at.saturating_duration_since(now))
            .min()
    }

    /// Take the next item whose path is not already in flight, marking it so.
    fn dispatch_next(&mut self) -> Option<WorkItem> {
        let index = self
            .ready
            .iter()
            .position(|item| !self.in_flight.contains(&item.path))?;
        let mut item = self.ready.remove(index)?;
        item.status = ItemStatus::InFlight;
        self.in_flight.insert(item.path.clone());
        Some(item)
    }

    fn finish(&mut self, path: &str) {
        self.in_flight.remove(path);
    }

    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty() && self.in_flight.is_empty()
    }
}

fn build_pool(name: &'static str, threads: usize) -> Result<ThreadPool, EngineError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .build()
        .map_err(|source| EngineError::ThreadPool { pool: name, source })
}

/// Runs one replication from `source` to `destination`.
pub struct Scheduler {
    source: Arc<dyn RemoteStore>,
    destination: Arc<dyn RemoteStore>,
    options: RunOptions,
    cancel: CancelToken,
}

impl Scheduler {
    /// Create a scheduler. `cancel` is the external stop signal.
    #[must_use]
    pub fn new(
        source: Arc<dyn RemoteStore>,
        destination: Arc<dyn RemoteStore>,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            destination,
            options,
            cancel,
        }
    }

    /// Run to completion, interruption or a fatal error.
    ///
    /// `on_progress` is called on the scheduling thread after every event and
    /// at least once per tick.
    ///
    /// # Errors
    ///
    /// * `CheckpointCorruption` / `CheckpointMismatch` if the checkpoint cannot be resumed
    /// * `ListingFailure` if either tree cannot be listed
    /// * `CheckpointWrite` if progress cannot be persisted
    /// * `ThreadPool` if the worker pools cannot be started
    pub fn run(
        &self,
        mut on_progress: impl FnMut(&ProgressSnapshot),
    ) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let options = &self.options;
        let source_name = self.source.describe();
        let destination_name = self.destination.describe();

        let checkpoint =
            Checkpoint::load_or_new(&options.checkpoint_path, &source_name, &destination_name)?;
        let completed = checkpoint.done_paths();
        let mut tracker = Tracker::new(
            checkpoint,
            FlushPolicy {
                persist: !options.dry_run,
                every: options.flush_every.max(1),
                interval: options.flush_interval,
                retry: options.checkpoint_retry,
            },
        );

        let transfer_pool = build_pool("transfer", options.transfers.max(1))?;
        let checker_pool = build_pool("checker", options.checkers.max(1))?;

        log::info!(
            "Replicating {source_name} -> {destination_name} ({} transfers, {} checkers, bwlimit {}{})",
            options.transfers,
            options.checkers,
            options
                .bandwidth
                .map_or_else(|| "off".to_string(), |rate| format!("{rate} B/s")),
            if options.dry_run { ", dry run" } else { "" }
        );

        // Workers watch `stop`, which is raised on a stop signal or a fatal error.
        let stop = CancelToken::new();
        let budget = Arc::new(TransferBudget::new(options.bandwidth, options.chunk_size));
        let worker = Worker::new(
            Arc::clone(&self.source),
            Arc::clone(&self.destination),
            Arc::clone(&budget),
            stop.clone(),
            WorkerSettings {
                chunk_size: options.chunk_size,
                io_timeout: options.io_timeout,
                dry_run: options.dry_run,
            },
        );

        let (tx, rx) = mpsc::channel();
        self.spawn_manifest(
            &checker_pool,
            completed,
            Arc::clone(&budget),
            stop.clone(),
            tx.clone(),
        );

        let mut queue = DispatchQueue::default();
        let mut manifest_done = false;
        let mut interrupted = false;
        let mut fatal: Option<EngineError> = None;

        loop {
            if !interrupted && fatal.is_none() && self.cancel.is_cancelled() {
                log::info!("Stop requested, waiting for in-flight transfers");
                interrupted = true;
                stop.cancel();
            }
            let stopping = interrupted || fatal.is_some();

            let now = Instant::now();
            if !stopping {
                queue.promote_due(now);
                while queue.in_flight() < options.transfers.max(1) {
                    let Some(item) = queue.dispatch_next() else {
                        break;
                    };
                    let worker = worker.clone();
                    let tx = tx.clone();
                    transfer_pool.spawn(move || {
                        let (item, result) = worker.run(item);
                        let _ = tx.send(Event::Finished(item, result));
                    });
                }
            }

            if queue.in_flight() == 0 && (stopping || (manifest_done && queue.is_drained())) {
                break;
            }

            let timeout = queue.next_wakeup(now).map_or(TICK, |d| d.min(TICK));
            match rx.recv_timeout(timeout) {
                Ok(Event::Manifest(entry)) => match entry {
                    ManifestEntry::Transfer(item) => {
                        tracker.discovered(&item);
                        queue.push(item);
                    }
                    ManifestEntry::Unchanged { .. } => tracker.unchanged(),
                    ManifestEntry::AlreadyDone { .. } => tracker.resumed(),
                    ManifestEntry::Excluded { .. } => tracker.excluded(),
                },
                Ok(Event::ManifestDone(result)) => {
                    manifest_done = true;
                    tracker.listing_complete();
                    if let Err(e) = result {
                        if stopping {
                            log::debug!("Diff abandoned: {e}");
                        } else {
                            stop.cancel();
                            fatal = Some(e);
                        }
                    }
                }
                Ok(Event::Finished(item, result)) => {
                    queue.finish(&item.path);
                    self.apply_outcome(item, result, stopping, &mut tracker, &mut queue);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }

            tracker.set_active_workers(budget.active_workers());
            if fatal.is_none() {
                if let Err(e) = tracker.maybe_flush() {
                    stop.cancel();
                    fatal = Some(e);
                }
            }
            on_progress(&tracker.snapshot());
        }

        tracker.set_active_workers(0);
        on_progress(&tracker.snapshot());

        let flushed = tracker.flush();
        if let Some(e) = fatal {
            return Err(e);
        }
        flushed?;

        let summary = tracker.into_summary(
            source_name,
            destination_name,
            started.elapsed(),
            interrupted,
        );
        log::info!(
            "Run {}: {} done, {} failed, {} would transfer, {} bytes in {:.1}s",
            summary.status(),
            summary.done.len(),
            summary.failed.len(),
            summary.would_transfer.len(),
            summary.bytes_transferred,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn spawn_manifest(
        &self,
        pool: &ThreadPool,
        completed: HashSet<String>,
        budget: Arc<TransferBudget>,
        stop: CancelToken,
        tx: Sender<Event>,
    ) {
        let options = &self.options;
        let builder =
            ManifestBuilder::new(Arc::clone(&self.source), Arc::clone(&self.destination))
                .roots(options.roots.clone())
                .exclude(options.exclude.clone())
                .case_insensitive(options.case_insensitive)
                .completed(completed)
                .verify(options.verify)
                .retry(options.listing_retry)
                .budget(budget, options.chunk_size)
                .io_timeout(options.io_timeout)
                .cancel(stop);

        pool.spawn(move || {
            let result = builder.plan(|entry| {
                let _ = tx.send(Event::Manifest(entry));
            });
            let _ = tx.send(Event::ManifestDone(result));
        });
    }

    fn apply_outcome(
        &self,
        mut item: WorkItem,
        result: Result<TransferOutcome, WorkerError>,
        stopping: bool,
        tracker: &mut Tracker,
        queue: &mut DispatchQueue,
    ) {
        match result {
            Ok(TransferOutcome::Transferred { bytes, checksum }) => {
                tracker.completed(&item, bytes, checksum);
            }
            Ok(TransferOutcome::WouldTransfer) => tracker.would_transfer(&item),
            Err(WorkerError::Cancelled { .. }) => {
                log::debug!("{} left pending", item.path);
            }
            Err(e) if e.is_retryable() && stopping => {
                log::debug!("{} left pending after {e}", item.path);
            }
            Err(e)
                if e.is_retryable() && self.options.transfer_retry.allows_retry(item.attempts) =>
            {
                tracker.retried(&item, &e);
                let delay = self.options.transfer_retry.delay_for(item.attempts);
                item.status = ItemStatus::Pending;
                queue.push_delayed(item, Instant::now() + delay);
            }
            Err(e) => tracker.failed(&item, &e),
        }
    }
}
