//! In-memory store with fault injection.
//!
//! Behaves like a cloud object store that reports checksums in its listings.
//! Faults can be queued to simulate flaky listings, failing reads, slow reads
//! and corruption in transit. Counters record how the store was used so tests
//! can assert on side effects (e.g. "nothing was written").

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::checksum::checksum_bytes;
use crate::error::{FailureKind, StoreError};
use crate::types::{ObjectSink, ObjectStream, RemoteEntry, RemoteStore};

/// A queued failure.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the next `times` listings.
    ListFailure {
        /// Failure classification.
        kind: FailureKind,
        /// Remaining occurrences.
        times: u32,
    },
    /// Fail the next `times` chunk reads of `path`.
    ReadFailure {
        /// Object path.
        path: String,
        /// Failure classification.
        kind: FailureKind,
        /// Remaining occurrences.
        times: u32,
    },
    /// Flip a byte in the next `times` commits of `path`.
    CorruptWrite {
        /// Object path.
        path: String,
        /// Remaining occurrences.
        times: u32,
    },
    /// Sleep before every chunk read of `path`.
    SlowRead {
        /// Object path.
        path: String,
        /// Delay per chunk.
        delay: Duration,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    faults: Vec<Fault>,
    listings: u64,
    write_opens: u64,
    commits: u64,
    reads: HashMap<String, u32>,
    active_reads: HashMap<String, u32>,
    max_concurrent_reads: HashMap<String, u32>,
}

impl MemoryState {
    fn take_list_fault(&mut self) -> Option<FailureKind> {
        self.faults.iter_mut().find_map(|fault| match fault {
            Fault::ListFailure { kind, times } if *times > 0 => {
                *times -= 1;
                Some(*kind)
            }
            _ => None,
        })
    }

    fn take_read_fault(&mut self, target: &str) -> Option<FailureKind> {
        self.faults.iter_mut().find_map(|fault| match fault {
            Fault::ReadFailure { path, kind, times } if path == target && *times > 0 => {
                *times -= 1;
                Some(*kind)
            }
            _ => None,
        })
    }

    fn take_corruption(&mut self, target: &str) -> bool {
        self.faults.iter_mut().any(|fault| match fault {
            Fault::CorruptWrite { path, times } if path == target && *times > 0 => {
                *times -= 1;
                true
            }
            _ => false,
        })
    }

    fn read_delay(&self, target: &str) -> Option<Duration> {
        self.faults.iter().find_map(|fault| match fault {
            Fault::SlowRead { path, delay } if path == target => Some(*delay),
            _ => None,
        })
    }
}

fn fault_error(kind: FailureKind, path: &str, what: &str) -> StoreError {
    match kind {
        FailureKind::Transient => StoreError::Transient {
            path: path.to_string(),
            message: format!("injected {what} failure"),
        },
        FailureKind::Permanent => StoreError::Permanent {
            path: path.to_string(),
            message: format!("injected {what} failure"),
        },
    }
}

/// An object store held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    listing_checksums: bool,
    commit_checksums: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            listing_checksums: true,
            commit_checksums: true,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Stop reporting checksums in listings, like stores without hash support.
    #[must_use]
    pub const fn without_listing_checksums(mut self) -> Self {
        self.listing_checksums = false;
        self
    }

    /// Stop returning checksums from commits, leaving verification to the caller.
    #[must_use]
    pub const fn without_commit_checksums(mut self) -> Self {
        self.commit_checksums = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly, bypassing counters and faults.
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.state().objects.insert(path.to_string(), data.into());
    }

    /// Contents of an object.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).cloned()
    }

    /// Paths of all stored objects, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Queue a fault.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Number of listings served (including failed ones).
    #[must_use]
    pub fn listings(&self) -> u64 {
        self.state().listings
    }

    /// Number of write sinks opened.
    #[must_use]
    pub fn write_opens(&self) -> u64 {
        self.state().write_opens
    }

    /// Number of objects committed.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.state().commits
    }

    /// Number of read streams opened for `path`.
    #[must_use]
    pub fn reads(&self, path: &str) -> u32 {
        self.state().reads.get(path).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously open read streams seen for any one path.
    #[must_use]
    pub fn max_concurrent_reads(&self) -> u32 {
        self.state()
            .max_concurrent_reads
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

impl RemoteStore for MemoryStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let mut state = self.state();
        state.listings += 1;
        if let Some(kind) = state.take_list_fault() {
            return Err(fault_error(kind, prefix, "listing"));
        }

        let prefix = prefix.trim_matches('/');
        Ok(state
            .objects
            .iter()
            .filter(|(path, _)| {
                prefix.is_empty()
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|(path, data)| {
                let checksum = self.listing_checksums.then(|| checksum_bytes(data));
                RemoteEntry::new(path.clone(), data.len() as u64, checksum)
            })
            .collect())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn ObjectStream>, StoreError> {
        let mut state = self.state();
        let data = state
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;

        *state.reads.entry(path.to_string()).or_default() += 1;
        let active = {
            let active = state.active_reads.entry(path.to_string()).or_default();
            *active += 1;
            *active
        };
        let max = state
            .max_concurrent_reads
            .entry(path.to_string())
            .or_default();
        *max = (*max).max(active);

        Ok(Box::new(MemoryStream {
            path: path.to_string(),
            data,
            offset: 0,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn ObjectSink>, StoreError> {
        if path.is_empty() || path.starts_with('/') {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        self.state().write_opens += 1;

        Ok(Box::new(MemorySink {
            path: path.to_string(),
            buffer: Vec::new(),
            report_checksum: self.commit_checksums,
            state: Arc::clone(&self.state),
        }))
    }

    fn metadata(&self, path: &str) -> Result<Option<RemoteEntry>, StoreError> {
        Ok(self.state().objects.get(path).map(|data| {
            let checksum = self.listing_checksums.then(|| checksum_bytes(data));
            RemoteEntry::new(path, data.len() as u64, checksum)
        }))
    }
}

struct MemoryStream {
    path: String,
    data: Vec<u8>,
    offset: usize,
    state: Arc<Mutex<MemoryState>>,
}

impl ObjectStream for MemoryStream {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let (fault, delay) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.take_read_fault(&self.path), state.read_delay(&self.path))
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(kind) = fault {
            return Err(fault_error(kind, &self.path, "read"));
        }

        let remaining = &self.data[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = state.active_reads.get_mut(&self.path) {
            *active = active.saturating_sub(1);
        }
    }
}

struct MemorySink {
    path: String,
    buffer: Vec<u8>,
    report_checksum: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl ObjectSink for MemorySink {
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Option<String>, StoreError> {
        let Self {
            path,
            mut buffer,
            report_checksum,
            state,
        } = *self;
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.take_corruption(&path) {
            match buffer.first_mut() {
                Some(byte) => *byte ^= 0xFF,
                None => buffer.push(0),
            }
        }

        let checksum = checksum_bytes(&buffer);
        state.objects.insert(path, buffer);
        state.commits += 1;

        Ok(report_checksum.then_some(checksum))
    }
}
