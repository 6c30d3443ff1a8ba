//! Remote store adapters for treemirror.
//!
//! A remote store is any hierarchical object store addressed by `/`-separated
//! relative paths. The replication engine only ever talks to stores through the
//! [`RemoteStore`] trait, which exposes four capabilities:
//!
//! * Listing every object below a sub-path
//! * Opening a chunked read stream for an object
//! * Opening a write sink that publishes an object on commit
//! * Fetching metadata for a single object
//!
//! Every failure carries a [`FailureKind`] so callers can decide whether a retry
//! makes sense.
//!
//! Two adapters ship with the crate:
//!
//! * [`LocalStore`] - a directory tree on the local filesystem
//! * [`MemoryStore`] - an in-memory store with fault injection for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use treemirror_store::{LocalStore, RemoteStore};
//!
//! let store = LocalStore::new("/mnt/archive");
//! for entry in store.list("")? {
//!     println!("{} ({} bytes)", entry.path, entry.size);
//! }
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod checksum;
mod error;
mod local;
mod memory;
mod types;

pub use checksum::{ChecksumHasher, checksum_bytes};
pub use error::{FailureKind, StoreError};
pub use local::LocalStore;
pub use memory::{Fault, MemoryStore};
pub use types::{ObjectSink, ObjectStream, RemoteEntry, RemoteStore, join_path};
