//! Deadline-bounded store calls.
//!
//! Adapter calls block, so each open object lives on a helper thread and every
//! call on it is a job whose reply is awaited with a deadline. A call that
//! misses its deadline, or is still running when the run is cancelled, is
//! abandoned: the caller gets `Timeout` or `Cancelled` right away and the
//! helper thread exits on its own once the adapter returns. Dropping an object
//! handle that was never committed discards it, as the store contract requires.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use treemirror_store::{ChecksumHasher, ObjectSink, ObjectStream, RemoteStore, StoreError};

use crate::budget::TransferBudget;
use crate::cancel::CancelToken;
use crate::error::WorkerError;

/// How often a waiting caller looks at the cancel token.
const POLL: Duration = Duration::from_millis(25);

type Job<R> = Box<dyn FnOnce(&mut R) + Send>;

/// Deadline and cancellation applied to every blocking store call.
#[derive(Debug, Clone)]
pub struct IoGuard {
    timeout: Duration,
    cancel: CancelToken,
}

impl IoGuard {
    /// Bound each call by `timeout` and abandon it when `cancel` fires.
    #[must_use]
    pub const fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self { timeout, cancel }
    }

    /// The token calls are abandoned on.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run a single store call under the deadline.
    ///
    /// # Errors
    ///
    /// * `Timeout` / `Cancelled` if the call does not return in time
    /// * `Store` if the call itself fails
    pub fn call<T, F>(&self, path: &str, operation: &'static str, f: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    {
        let mut io = IoThread::open(self, path, operation, || Ok(()))?;
        io.call(operation, move |_| f())?.map_err(WorkerError::from)
    }
}

/// A helper thread owning one store resource.
struct IoThread<R> {
    jobs: Option<Sender<Job<R>>>,
    handle: Option<JoinHandle<()>>,
    guard: IoGuard,
    path: String,
    stalled: bool,
}

impl<R: 'static> IoThread<R> {
    /// Spawn the thread and wait for `open` to produce its resource.
    fn open<F>(
        guard: &IoGuard,
        path: &str,
        operation: &'static str,
        open: F,
    ) -> Result<Self, WorkerError>
    where
        F: FnOnce() -> Result<R, StoreError> + Send + 'static,
    {
        let (jobs, queue) = mpsc::channel::<Job<R>>();
        let (opened_tx, opened) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name(format!("{operation}-io"))
            .spawn(move || {
                let mut resource = match open() {
                    Ok(resource) => resource,
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                if opened_tx.send(Ok(())).is_err() {
                    return;
                }
                for job in queue {
                    job(&mut resource);
                }
            })
            .map_err(|e| StoreError::io(path, e))?;

        let mut io = Self {
            jobs: Some(jobs),
            handle: Some(handle),
            guard: guard.clone(),
            path: path.to_string(),
            stalled: false,
        };
        io.wait(&opened, operation)??;
        Ok(io)
    }

    /// Run `f` against the resource and wait for its result.
    fn call<T, F>(&mut self, operation: &'static str, f: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut R) -> T + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let job: Job<R> = Box::new(move |resource| {
            let _ = reply.send(f(resource));
        });
        if let Some(jobs) = &self.jobs {
            // A closed queue drops the job, which disconnects `result`.
            let _ = jobs.send(job);
        }
        self.wait(&result, operation)
    }

    fn wait<T>(&mut self, result: &Receiver<T>, operation: &'static str) -> Result<T, WorkerError> {
        let deadline = Instant::now() + self.guard.timeout;
        loop {
            if self.guard.cancel.is_cancelled() {
                self.stalled = true;
                return Err(WorkerError::Cancelled {
                    path: self.path.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                self.stalled = true;
                return Err(WorkerError::Timeout {
                    path: self.path.clone(),
                    operation,
                    timeout: self.guard.timeout,
                });
            }
            match result.recv_timeout((deadline - now).min(POLL)) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WorkerError::Store(StoreError::Transient {
                        path: self.path.clone(),
                        message: format!("{operation} thread exited"),
                    }));
                }
            }
        }
    }
}

impl<R> Drop for IoThread<R> {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(handle) = self.handle.take() {
            if self.stalled {
                log::debug!("Abandoning stalled store call on {}", self.path);
            } else {
                let _ = handle.join();
            }
        }
    }
}

/// Chunked reader over one source object.
pub struct ChunkReader {
    io: IoThread<Box<dyn ObjectStream>>,
    chunk_size: usize,
}

impl ChunkReader {
    /// Open `path` on `store`.
    ///
    /// # Errors
    ///
    /// * If the open fails, times out or is cancelled
    pub fn open(
        store: &Arc<dyn RemoteStore>,
        path: &str,
        chunk_size: usize,
        guard: &IoGuard,
    ) -> Result<Self, WorkerError> {
        let store = Arc::clone(store);
        let target = path.to_string();
        let io = IoThread::open(guard, path, "read", move || store.open_read(&target))?;
        Ok(Self {
            io,
            chunk_size: chunk_size.max(1),
        })
    }

    /// The next chunk; empty at the end of the object.
    ///
    /// # Errors
    ///
    /// * If the read fails, times out or is cancelled
    pub fn next_chunk(&mut self) -> Result<Vec<u8>, WorkerError> {
        let size = self.chunk_size;
        let chunk = self.io.call("read", move |stream| {
            let mut buf = vec![0u8; size];
            let n = stream.read_chunk(&mut buf)?;
            buf.truncate(n);
            Ok::<_, StoreError>(buf)
        })??;
        Ok(chunk)
    }
}

/// Chunked writer for one destination object.
///
/// Dropping the writer before [`ChunkWriter::commit`] discards the object.
pub struct ChunkWriter {
    io: IoThread<Option<Box<dyn ObjectSink>>>,
    path: String,
}

impl ChunkWriter {
    /// Open `path` on `store` for writing.
    ///
    /// # Errors
    ///
    /// * If the open fails, times out or is cancelled
    pub fn open(
        store: &Arc<dyn RemoteStore>,
        path: &str,
        guard: &IoGuard,
    ) -> Result<Self, WorkerError> {
        let store = Arc::clone(store);
        let target = path.to_string();
        let io = IoThread::open(guard, path, "write", move || {
            store.open_write(&target).map(Some)
        })?;
        Ok(Self {
            io,
            path: path.to_string(),
        })
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// * If the write fails, times out or is cancelled
    pub fn write(&mut self, chunk: Vec<u8>) -> Result<(), WorkerError> {
        let path = self.path.clone();
        self.io.call("write", move |sink| match sink {
            Some(sink) => sink.write_chunk(&chunk),
            None => Err(closed(&path)),
        })??;
        Ok(())
    }

    /// Publish the object, returning the store's checksum if it reports one.
    ///
    /// # Errors
    ///
    /// * If the commit fails, times out or is cancelled
    pub fn commit(mut self) -> Result<Option<String>, WorkerError> {
        let path = self.path.clone();
        let checksum = self.io.call("commit", move |sink| {
            sink.take().map_or_else(|| Err(closed(&path)), |sink| sink.commit())
        })??;
        Ok(checksum)
    }
}

fn closed(path: &str) -> StoreError {
    StoreError::Permanent {
        path: path.to_string(),
        message: "sink already committed".to_string(),
    }
}

/// SHA-256 of an object, read in chunks drawn from `budget`.
///
/// # Errors
///
/// * `Cancelled` if the guard's token fires while reading or waiting for budget
/// * `Timeout` / `Store` if a read fails
pub fn budgeted_checksum(
    store: &Arc<dyn RemoteStore>,
    path: &str,
    budget: &TransferBudget,
    chunk_size: usize,
    guard: &IoGuard,
) -> Result<String, WorkerError> {
    let mut reader = ChunkReader::open(store, path, chunk_size, guard)?;
    let mut hasher = ChecksumHasher::new();
    loop {
        let chunk = reader.next_chunk()?;
        if chunk.is_empty() {
            break;
        }
        if !budget.acquire(chunk.len(), guard.cancel_token()) {
            return Err(WorkerError::Cancelled {
                path: path.to_string(),
            });
        }
        hasher.update(&chunk);
    }
    Ok(hasher.finish())
}
