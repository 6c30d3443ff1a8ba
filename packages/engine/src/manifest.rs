//! Manifest building: diff the source tree against the destination.
//!
//! Both trees are listed in full (with retries) before any comparison starts,
//! since a partial listing would produce a wrong diff. Comparisons then run in
//! parallel on the current rayon pool and every result is handed to a callback
//! as soon as it is known, so transfers can begin before the diff completes.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rayon::prelude::*;
use treemirror_filter::{ExcludeFilter, PathKey};
use treemirror_store::{RemoteEntry, RemoteStore};

use crate::budget::TransferBudget;
use crate::cancel::CancelToken;
use crate::error::{EngineError, WorkerError};
use crate::io::{IoGuard, budgeted_checksum};
use crate::item::{DiffReason, WorkItem};
use crate::retry::RetryPolicy;

/// One result of the diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    /// Needs copying.
    Transfer(WorkItem),
    /// Already identical at the destination.
    Unchanged {
        /// Relative path.
        path: String,
    },
    /// Recorded as done by an earlier run and not re-verified.
    AlreadyDone {
        /// Relative path.
        path: String,
    },
    /// Matched an exclusion pattern.
    Excluded {
        /// Relative path.
        path: String,
    },
}

/// Totals of one diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestStats {
    /// Objects found in the source (after de-duplication, before exclusion).
    pub source_objects: u64,
    /// Items that need copying.
    pub transfer: u64,
    /// Bytes that need copying.
    pub transfer_bytes: u64,
    /// Identical objects.
    pub unchanged: u64,
    /// Objects skipped because of the checkpoint.
    pub already_done: u64,
    /// Excluded objects.
    pub excluded: u64,
}

/// A fully materialized diff.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Items to copy, sorted by path.
    pub items: Vec<WorkItem>,
    /// Identical objects, sorted.
    pub unchanged: Vec<String>,
    /// Objects skipped because of the checkpoint, sorted.
    pub already_done: Vec<String>,
    /// Excluded objects, sorted.
    pub excluded: Vec<String>,
}

/// Configures and runs a diff between two stores.
pub struct ManifestBuilder {
    source: Arc<dyn RemoteStore>,
    destination: Arc<dyn RemoteStore>,
    roots: Vec<String>,
    exclude: ExcludeFilter,
    path_key: PathKey,
    completed: HashSet<String>,
    verify: bool,
    retry: RetryPolicy,
    cancel: CancelToken,
    budget: Arc<TransferBudget>,
    chunk_size: usize,
    io_timeout: Duration,
}

impl ManifestBuilder {
    /// Diff the whole of `source` against `destination`.
    #[must_use]
    pub fn new(source: Arc<dyn RemoteStore>, destination: Arc<dyn RemoteStore>) -> Self {
        Self {
            source,
            destination,
            roots: Vec::new(),
            exclude: ExcludeFilter::empty(),
            path_key: PathKey::default(),
            completed: HashSet::new(),
            verify: false,
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
            budget: Arc::new(TransferBudget::unlimited()),
            chunk_size: 1024 * 1024,
            io_timeout: Duration::from_secs(30),
        }
    }

    /// Restrict the diff to these sub-paths. Empty means the whole tree.
    #[must_use]
    pub fn roots(mut self, roots: Vec<String>) -> Self {
        self.roots = roots;
        self
    }

    /// Skip objects whose basename matches `exclude`.
    #[must_use]
    pub fn exclude(mut self, exclude: ExcludeFilter) -> Self {
        self.exclude = exclude;
        self
    }

    /// Match destination paths case-insensitively.
    #[must_use]
    pub const fn case_insensitive(mut self, enabled: bool) -> Self {
        self.path_key = PathKey::new(enabled);
        self
    }

    /// Paths an earlier run already completed.
    #[must_use]
    pub fn completed(mut self, completed: HashSet<String>) -> Self {
        self.completed = completed;
        self
    }

    /// Re-compare completed paths instead of trusting the checkpoint.
    #[must_use]
    pub const fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Retry policy for listings.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abandon the diff when `cancel` fires.
    #[must_use]
    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Draw checksum reads from `budget`, in chunks of `chunk_size` bytes.
    #[must_use]
    pub fn budget(mut self, budget: Arc<TransferBudget>, chunk_size: usize) -> Self {
        self.budget = budget;
        self.chunk_size = chunk_size;
        self
    }

    /// Longest a single checksum read may block.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    fn prefixes(&self) -> Vec<String> {
        if self.roots.is_empty() {
            return vec![String::new()];
        }
        let normalize = PathKey::new(false);
        self.roots.iter().map(|root| normalize.key(root)).collect()
    }

    fn list_tree(&self, store: &dyn RemoteStore) -> Result<Vec<RemoteEntry>, EngineError> {
        let mut entries = BTreeMap::new();
        for prefix in self.prefixes() {
            let listed = self
                .retry
                .run(&self.cancel, |_| store.list(&prefix), |_| true)
                .map_err(|(source, attempts)| EngineError::ListingFailure {
                    store: store.describe(),
                    prefix: prefix.clone(),
                    attempts,
                    source,
                })?;
            log::debug!(
                "Listed {} object(s) in {} under '{prefix}'",
                listed.len(),
                store.describe()
            );
            for entry in listed {
                entries.insert(entry.path.clone(), entry);
            }
        }
        Ok(entries.into_values().collect())
    }

    /// Run the diff, handing every result to `emit` as it becomes known.
    ///
    /// Comparisons run on the rayon pool the call is made from. Objects whose
    /// checksums have to be read are hashed under the transfer budget.
    ///
    /// # Errors
    ///
    /// * `ListingFailure` if either tree cannot be listed within the retry policy
    /// * `Interrupted` if the cancel token fires before every object is compared
    pub fn plan<F>(&self, emit: F) -> Result<ManifestStats, EngineError>
    where
        F: Fn(ManifestEntry) + Sync,
    {
        let (source, destination) = rayon::join(
            || self.list_tree(self.source.as_ref()),
            || self.list_tree(self.destination.as_ref()),
        );
        let source = source?;
        let destination = destination?;

        let index: HashMap<String, RemoteEntry> = destination
            .into_iter()
            .filter(|entry| !self.exclude.is_excluded(&entry.path))
            .map(|entry| (self.path_key.key(&entry.path), entry))
            .collect();

        let mut stats = ManifestStats {
            source_objects: source.len() as u64,
            ..ManifestStats::default()
        };

        let guard = IoGuard::new(self.io_timeout, self.cancel.clone());
        let results: Vec<ManifestEntry> = source
            .into_par_iter()
            .filter_map(|entry| {
                let result = self.compare(entry, &index, &guard)?;
                emit(result.clone());
                Some(result)
            })
            .collect();
        let compared = results.len() as u64;
        if compared < stats.source_objects {
            log::debug!(
                "Diff stopped after {compared} of {} object(s)",
                stats.source_objects
            );
            return Err(EngineError::Interrupted);
        }

        for result in &results {
            match result {
                ManifestEntry::Transfer(item) => {
                    stats.transfer += 1;
                    stats.transfer_bytes += item.size;
                }
                ManifestEntry::Unchanged { .. } => stats.unchanged += 1,
                ManifestEntry::AlreadyDone { .. } => stats.already_done += 1,
                ManifestEntry::Excluded { .. } => stats.excluded += 1,
            }
        }

        log::info!(
            "Diff complete: {} to transfer, {} unchanged, {} already done, {} excluded",
            stats.transfer,
            stats.unchanged,
            stats.already_done,
            stats.excluded
        );
        Ok(stats)
    }

    /// Run the diff and collect every result.
    ///
    /// # Errors
    ///
    /// * `ListingFailure` if either tree cannot be listed within the retry policy
    /// * `Interrupted` if the cancel token fires first
    pub fn build(&self) -> Result<Manifest, EngineError> {
        let manifest = Mutex::new(Manifest::default());
        self.plan(|entry| {
            let mut manifest = manifest.lock().unwrap_or_else(PoisonError::into_inner);
            match entry {
                ManifestEntry::Transfer(item) => manifest.items.push(item),
                ManifestEntry::Unchanged { path } => manifest.unchanged.push(path),
                ManifestEntry::AlreadyDone { path } => manifest.already_done.push(path),
                ManifestEntry::Excluded { path } => manifest.excluded.push(path),
            }
        })?;

        let mut manifest = manifest.into_inner().unwrap_or_else(PoisonError::into_inner);
        manifest.items.sort_by(|a, b| a.path.cmp(&b.path));
        manifest.unchanged.sort();
        manifest.already_done.sort();
        manifest.excluded.sort();
        Ok(manifest)
    }

    fn read_checksum(
        &self,
        store: &Arc<dyn RemoteStore>,
        path: &str,
        guard: &IoGuard,
    ) -> Result<String, WorkerError> {
        budgeted_checksum(store, path, &self.budget, self.chunk_size, guard)
    }

    /// Classify one source object. `None` once the diff is cancelled.
    fn compare(
        &self,
        entry: RemoteEntry,
        index: &HashMap<String, RemoteEntry>,
        guard: &IoGuard,
    ) -> Option<ManifestEntry> {
        let RemoteEntry {
            path,
            size,
            checksum,
        } = entry;

        if self.cancel.is_cancelled() {
            return None;
        }
        if self.exclude.is_excluded(&path) {
            return Some(ManifestEntry::Excluded { path });
        }
        if !self.verify && self.completed.contains(&path) {
            return Some(ManifestEntry::AlreadyDone { path });
        }

        let Some(existing) = index.get(&self.path_key.key(&path)) else {
            return Some(ManifestEntry::Transfer(WorkItem::new(
                path,
                size,
                checksum,
                DiffReason::Missing,
            )));
        };
        if existing.size != size {
            return Some(ManifestEntry::Transfer(WorkItem::new(
                path,
                size,
                checksum,
                DiffReason::SizeChanged,
            )));
        }

        let source_checksum = match checksum {
            Some(checksum) => checksum,
            None => match self.read_checksum(&self.source, &path, guard) {
                Ok(checksum) => checksum,
                Err(WorkerError::Cancelled { .. }) => return None,
                Err(e) => {
                    log::debug!("Cannot checksum source {path}: {e}");
                    return Some(ManifestEntry::Transfer(WorkItem::new(
                        path,
                        size,
                        None,
                        DiffReason::Unverified,
                    )));
                }
            },
        };
        let destination_checksum = match &existing.checksum {
            Some(checksum) => checksum.clone(),
            None => match self.read_checksum(&self.destination, &existing.path, guard) {
                Ok(checksum) => checksum,
                Err(WorkerError::Cancelled { .. }) => return None,
                Err(e) => {
                    log::debug!("Cannot checksum destination {}: {e}", existing.path);
                    return Some(ManifestEntry::Transfer(WorkItem::new(
                        path,
                        size,
                        Some(source_checksum),
                        DiffReason::Unverified,
                    )));
                }
            },
        };

        Some(if source_checksum == destination_checksum {
            ManifestEntry::Unchanged { path }
        } else {
            ManifestEntry::Transfer(WorkItem::new(
                path,
                size,
                Some(source_checksum),
                DiffReason::ChecksumChanged,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use treemirror_store::{FailureKind, Fault, MemoryStore};

    fn stores() -> (MemoryStore, MemoryStore) {
        (MemoryStore::new("src"), MemoryStore::new("dst"))
    }

    fn builder(source: &MemoryStore, destination: &MemoryStore) -> ManifestBuilder {
        ManifestBuilder::new(Arc::new(source.clone()), Arc::new(destination.clone()))
            .retry(RetryPolicy::new(3, Duration::ZERO, 1.0))
    }

    #[test]
    fn test_diff_classifies_objects() {
        let (source, destination) = stores();
        source.insert("missing.txt", "new");
        source.insert("resized.txt", "longer body");
        source.insert("edited.txt", "aaaa");
        source.insert("same.txt", "same");
        destination.insert("resized.txt", "short");
        destination.insert("edited.txt", "bbbb");
        destination.insert("same.txt", "same");
        destination.insert("extra.txt", "only at destination");

        let manifest = builder(&source, &destination).build().unwrap();

        let reasons: Vec<_> = manifest
            .items
            .iter()
            .map(|item| (item.path.as_str(), item.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("edited.txt", DiffReason::ChecksumChanged),
                ("missing.txt", DiffReason::Missing),
                ("resized.txt", DiffReason::SizeChanged),
            ]
        );
        assert_eq!(manifest.unchanged, vec!["same.txt".to_string()]);
    }

    #[test]
    fn test_completed_paths_are_skipped_unless_verifying() {
        let (source, destination) = stores();
        source.insert("a.txt", "a");
        source.insert("b.txt", "b");
        let completed = HashSet::from(["a.txt".to_string()]);

        let resumed = builder(&source, &destination)
            .completed(completed.clone())
            .build()
            .unwrap();
        assert_eq!(resumed.already_done, vec!["a.txt".to_string()]);
        assert_eq!(resumed.items.len(), 1);

        let verified = builder(&source, &destination)
            .completed(completed)
            .verify(true)
            .build()
            .unwrap();
        assert!(verified.already_done.is_empty());
        assert_eq!(verified.items.len(), 2);
    }

    #[test]
    fn test_exclusions_are_counted_not_transferred() {
        let (source, destination) = stores();
        source.insert("docs/.DS_Store", "junk");
        source.insert("docs/~$draft.docx", "lock");
        source.insert("docs/report.pdf", "pdf");

        let manifest = builder(&source, &destination)
            .exclude(ExcludeFilter::new(&[".DS_Store", "~$*"]).unwrap())
            .build()
            .unwrap();

        assert_eq!(manifest.excluded.len(), 2);
        assert_eq!(manifest.items.len(), 1);
        assert_eq!(manifest.items[0].path, "docs/report.pdf");
    }

    #[test]
    fn test_case_insensitive_matching() {
        let (source, destination) = stores();
        source.insert("Photos/IMG_1.jpg", "jpeg");
        destination.insert("photos/img_1.jpg", "jpeg");

        let strict = builder(&source, &destination).build().unwrap();
        assert_eq!(strict.items.len(), 1);

        let folded = builder(&source, &destination)
            .case_insensitive(true)
            .build()
            .unwrap();
        assert!(folded.items.is_empty());
        assert_eq!(folded.unchanged.len(), 1);
    }

    #[test]
    fn test_roots_restrict_and_deduplicate() {
        let (source, destination) = stores();
        source.insert("music/a.mp3", "a");
        source.insert("music/live/b.mp3", "b");
        source.insert("video/c.mp4", "c");

        let manifest = builder(&source, &destination)
            .roots(vec!["music".to_string(), "music/live".to_string()])
            .build()
            .unwrap();

        let paths: Vec<_> = manifest.items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["music/a.mp3", "music/live/b.mp3"]);
    }

    #[test]
    fn test_checksums_fetched_when_listing_lacks_them() {
        let source = MemoryStore::new("src").without_listing_checksums();
        let destination = MemoryStore::new("dst").without_listing_checksums();
        source.insert("same.txt", "data");
        source.insert("edited.txt", "aaaa");
        destination.insert("same.txt", "data");
        destination.insert("edited.txt", "bbbb");

        let manifest = builder(&source, &destination).build().unwrap();

        assert_eq!(manifest.unchanged, vec!["same.txt".to_string()]);
        assert_eq!(manifest.items[0].reason, DiffReason::ChecksumChanged);
        assert!(manifest.items[0].source_checksum.is_some());
    }

    #[test]
    fn test_checksum_reads_respect_the_bandwidth_limit() {
        let source = MemoryStore::new("src").without_listing_checksums();
        let destination = MemoryStore::new("dst").without_listing_checksums();
        for i in 0..4 {
            source.insert(&format!("f{i}.bin"), vec![1u8; 2000]);
            destination.insert(&format!("f{i}.bin"), vec![1u8; 2000]);
        }
        let budget = Arc::new(TransferBudget::new(Some(16_000), 1000));

        let started = std::time::Instant::now();
        let manifest = builder(&source, &destination)
            .budget(Arc::clone(&budget), 1000)
            .build()
            .unwrap();

        assert_eq!(manifest.unchanged.len(), 4);
        assert_eq!(budget.consumed(), 16_000);
        // Everything beyond the initial bucket has to wait for tokens.
        assert!(started.elapsed() >= Duration::from_millis(850));
    }

    #[test]
    fn test_cancelled_diff_is_interrupted() {
        let (source, destination) = stores();
        source.insert("a.txt", "a");
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = builder(&source, &destination).cancel(cancel).build();

        assert!(matches!(result, Err(EngineError::Interrupted)));
    }

    #[test]
    fn test_transient_listing_failure_is_retried() {
        let (source, destination) = stores();
        source.insert("a.txt", "a");
        source.inject(Fault::ListFailure {
            kind: FailureKind::Transient,
            times: 2,
        });

        let manifest = builder(&source, &destination).build().unwrap();

        assert_eq!(manifest.items.len(), 1);
        assert_eq!(source.listings(), 3);
    }

    #[test]
    fn test_exhausted_listing_is_fatal() {
        let (source, destination) = stores();
        source.insert("a.txt", "a");
        destination.inject(Fault::ListFailure {
            kind: FailureKind::Permanent,
            times: 10,
        });

        let result = builder(&source, &destination).build();

        assert!(matches!(
            result,
            Err(EngineError::ListingFailure { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_plan_emits_every_entry() {
        let (source, destination) = stores();
        for i in 0..50 {
            source.insert(&format!("f{i}.bin"), vec![0u8; i]);
        }
        let seen = Mutex::new(0u64);

        let stats = builder(&source, &destination)
            .plan(|_| *seen.lock().unwrap() += 1)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), 50);
        assert_eq!(stats.transfer, 50);
        assert_eq!(stats.transfer_bytes, (0..50).sum::<u64>());
    }
}
