//! Error types for store operations.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::io;

/// Whether a failed store operation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network blips, rate limiting, timeouts. Retrying may succeed.
    Transient,
    /// Authorization failures, missing objects, invalid paths. Retrying will not help.
    Permanent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Errors that can occur while talking to a remote store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("Object not found: {path}")]
    NotFound {
        /// Relative object path.
        path: String,
    },

    /// An IO error from the underlying storage.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Relative object path.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A failure the store reports as retryable.
    #[error("Transient failure at {path}: {message}")]
    Transient {
        /// Relative object path.
        path: String,
        /// Error message from the store.
        message: String,
    },

    /// A failure the store reports as final.
    #[error("Permanent failure at {path}: {message}")]
    Permanent {
        /// Relative object path.
        path: String,
        /// Error message from the store.
        message: String,
    },

    /// The path escapes the store root or is otherwise malformed.
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    /// Build an IO error for `path`.
    #[must_use]
    pub fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::Io { source, .. } => classify_io(source.kind()),
            Self::NotFound { .. } | Self::Permanent { .. } | Self::InvalidPath(_) => {
                FailureKind::Permanent
            }
        }
    }

    /// Whether retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

const fn classify_io(kind: io::ErrorKind) -> FailureKind {
    match kind {
        io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified_by_kind() {
        let timeout = StoreError::io("a", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let denied = StoreError::io(
            "a",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );

        assert_eq!(timeout.kind(), FailureKind::Transient);
        assert_eq!(denied.kind(), FailureKind::Permanent);
    }

    #[test]
    fn test_explicit_kinds() {
        let transient = StoreError::Transient {
            path: "a".to_string(),
            message: "rate limited".to_string(),
        };
        let missing = StoreError::NotFound {
            path: "a".to_string(),
        };

        assert!(transient.is_transient());
        assert!(!missing.is_transient());
    }
}
