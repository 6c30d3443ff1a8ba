//! Path filtering for treemirror.
//!
//! * [`ExcludeFilter`] matches object basenames against glob patterns
//!   (`.DS_Store`, `._*`, `*.tmp`, ...) so junk files never enter a diff.
//! * [`PathKey`] normalizes relative paths into comparison keys, optionally
//!   case-folded for stores that treat `Foo.txt` and `foo.txt` as one object.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Errors that can occur while building a filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A pattern failed to compile.
    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The underlying globset error.
        #[source]
        source: globset::Error,
    },

    /// The compiled set could not be built.
    #[error("Failed to build exclude set: {0}")]
    Build(#[source] globset::Error),
}

/// Basename exclusion filter.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExcludeFilter {
    /// Compile a filter from basename patterns.
    ///
    /// # Errors
    ///
    /// * If any pattern is not a valid glob
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).map_err(|e| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                source: e,
            })?;
            builder.add(glob);
        }

        let set = builder.build().map_err(FilterError::Build)?;
        log::debug!("Compiled {} exclude patterns", patterns.len());

        Ok(Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            set,
        })
    }

    /// A filter that excludes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// The source patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `path` (relative, `/`-separated) is excluded.
    ///
    /// Only the final component is matched.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.set.is_match(basename)
    }
}

impl Default for ExcludeFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builds comparison keys for relative paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathKey {
    case_insensitive: bool,
}

impl PathKey {
    /// Create a key builder.
    #[must_use]
    pub const fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    /// Normalize `path` into a key: strip `./` and surplus slashes, fold case if enabled.
    #[must_use]
    pub fn key(&self, path: &str) -> String {
        let normalized = path
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect::<Vec<_>>()
            .join("/");

        if self.case_insensitive {
            normalized.to_lowercase()
        } else {
            normalized
        }
    }
}
