//! SHA-256 checksum helpers.
//!
//! Every checksum in treemirror is the lowercase hex SHA-256 digest of the
//! complete object contents.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use sha2::{Digest, Sha256};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = ChecksumHasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Incremental checksum over a chunked stream.
#[derive(Debug, Clone, Default)]
pub struct ChecksumHasher {
    inner: Sha256,
    bytes: u64,
}

impl ChecksumHasher {
    /// Create an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes hashed so far.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher and return the hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
