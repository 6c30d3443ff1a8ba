//! Error types for configuration loading.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file {}: {source}", path.display())]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML config {}: {source}", path.display())]
    TomlParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// An explicitly requested config file does not exist.
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A setting has an unusable value.
    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        /// Setting name as written in the config file.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Exclude patterns failed to compile.
    #[error("Invalid exclude patterns: {0}")]
    FilterError(#[from] treemirror_filter::FilterError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}
