//! Configuration types for treemirror.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use treemirror_filter::ExcludeFilter;

use crate::error::ConfigError;
use crate::rate::{parse_rate, parse_size};

/// Default checkpoint file name, relative to the working directory.
pub const DEFAULT_CHECKPOINT_FILE: &str = ".treemirror-checkpoint.json";

/// Largest accepted `chunkSize`. Every worker holds one chunk in memory.
pub const MAX_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

/// Bounded exponential backoff settings for one class of operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
}

impl RetryConfig {
    /// Delay before the first retry.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(field, "maxAttempts must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                field,
                format!("multiplier must be >= 1.0, got {}", self.multiplier),
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

/// Retry settings per operation class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Listing either tree.
    pub listing: RetryConfig,
    /// Transferring one object.
    pub transfer: RetryConfig,
    /// Writing the checkpoint file.
    pub checkpoint: RetryConfig,
}

/// treemirror configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Number of concurrent transfer workers.
    pub transfers: usize,

    /// Number of concurrent listing/metadata checkers.
    pub checkers: usize,

    /// Bandwidth ceiling (e.g. `"100M"`), `None` or `"off"` for unlimited.
    pub bwlimit: Option<String>,

    /// Size of each copied chunk (e.g. `"1M"`).
    pub chunk_size: String,

    /// Checkpoint file path.
    pub checkpoint: PathBuf,

    /// Flush the checkpoint at least this often while transfers complete.
    pub flush_interval_secs: u64,

    /// Flush the checkpoint after this many completed items.
    pub flush_every: u64,

    /// Maximum duration of a single chunk read/write before it counts as a timeout.
    pub io_timeout_secs: u64,

    /// Match destination paths case-insensitively.
    pub case_insensitive: bool,

    /// Sub-paths to replicate. Empty means the whole tree.
    pub roots: Vec<String>,

    /// Basename glob patterns that are never replicated.
    pub exclude: Vec<String>,

    /// Retry policies.
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transfers: 4,
            checkers: 8,
            bwlimit: None,
            chunk_size: "1M".to_string(),
            checkpoint: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            flush_interval_secs: 5,
            flush_every: 64,
            io_timeout_secs: 30,
            case_insensitive: false,
            roots: Vec::new(),
            exclude: [".DS_Store", "Thumbs.db", "._*", "~$*", "*.boxnote", "*.tmp"]
                .into_iter()
                .map(String::from)
                .collect(),
            retry: RetrySettings::default(),
        }
    }
}

/// Values supplied on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--transfers`
    pub transfers: Option<usize>,
    /// `--checkers`
    pub checkers: Option<usize>,
    /// `--bwlimit`
    pub bwlimit: Option<String>,
    /// `--checkpoint`
    pub checkpoint: Option<PathBuf>,
}

impl Config {
    /// Apply command-line overrides.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(transfers) = overrides.transfers {
            self.transfers = transfers;
        }
        if let Some(checkers) = overrides.checkers {
            self.checkers = checkers;
        }
        if let Some(bwlimit) = overrides.bwlimit {
            self.bwlimit = Some(bwlimit);
        }
        if let Some(checkpoint) = overrides.checkpoint {
            self.checkpoint = checkpoint;
        }
    }

    /// Bandwidth ceiling in bytes per second, `None` for unlimited.
    ///
    /// # Errors
    ///
    /// * If `bwlimit` cannot be parsed
    pub fn bandwidth_limit(&self) -> Result<Option<u64>, ConfigError> {
        self.bwlimit
            .as_deref()
            .map_or(Ok(None), |value| parse_rate("bwlimit", value))
    }

    /// Chunk size in bytes.
    ///
    /// # Errors
    ///
    /// * If `chunkSize` cannot be parsed, is zero or exceeds [`MAX_CHUNK_SIZE`]
    pub fn chunk_size_bytes(&self) -> Result<usize, ConfigError> {
        let bytes = parse_size("chunkSize", &self.chunk_size)?;
        if bytes == 0 {
            return Err(ConfigError::invalid("chunkSize", "must be greater than 0"));
        }
        if bytes > MAX_CHUNK_SIZE {
            return Err(ConfigError::invalid(
                "chunkSize",
                format!("{} exceeds the 256M maximum", self.chunk_size),
            ));
        }
        usize::try_from(bytes)
            .map_err(|_| ConfigError::invalid("chunkSize", format!("{bytes} is too large")))
    }

    /// Compiled exclude filter.
    ///
    /// # Errors
    ///
    /// * If any pattern is invalid
    pub fn exclude_filter(&self) -> Result<ExcludeFilter, ConfigError> {
        Ok(ExcludeFilter::new(&self.exclude)?)
    }

    /// Checkpoint flush interval.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Per-chunk IO timeout.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Check every setting, failing on the first unusable one.
    ///
    /// # Errors
    ///
    /// * If any setting is out of range or unparsable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfers == 0 {
            return Err(ConfigError::invalid("transfers", "must be at least 1"));
        }
        if self.checkers == 0 {
            return Err(ConfigError::invalid("checkers", "must be at least 1"));
        }
        if self.flush_every == 0 {
            return Err(ConfigError::invalid("flushEvery", "must be at least 1"));
        }
        if self.io_timeout_secs == 0 {
            return Err(ConfigError::invalid("ioTimeoutSecs", "must be at least 1"));
        }
        if self.checkpoint.as_os_str().is_empty() {
            return Err(ConfigError::invalid("checkpoint", "path is empty"));
        }
        if let Some(root) = self.roots.iter().find(|r| r.split('/').any(|c| c == "..")) {
            return Err(ConfigError::invalid(
                "roots",
                format!("'{root}' escapes the tree"),
            ));
        }

        self.bandwidth_limit()?;
        self.chunk_size_bytes()?;
        self.exclude_filter()?;
        self.retry.listing.validate("retry.listing")?;
        self.retry.transfer.validate("retry.transfer")?;
        self.retry.checkpoint.validate("retry.checkpoint")?;

        Ok(())
    }
}

/// A configuration with its origin.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The parsed configuration.
    pub config: Config,
    /// File it was loaded from, `None` for built-in defaults.
    pub config_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.transfers, 4);
        assert_eq!(config.checkers, 8);
        assert_eq!(config.bandwidth_limit().unwrap(), None);
        assert_eq!(config.chunk_size_bytes().unwrap(), 1024 * 1024);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            transfers: Some(2),
            checkers: None,
            bwlimit: Some("10M".to_string()),
            checkpoint: Some(PathBuf::from("state.json")),
        });

        assert_eq!(config.transfers, 2);
        assert_eq!(config.checkers, 8);
        assert_eq!(config.bandwidth_limit().unwrap(), Some(10 * 1024 * 1024));
        assert_eq!(config.checkpoint, PathBuf::from("state.json"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = Config {
            transfers: 0,
            ..Config::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "transfers",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_bad_bwlimit() {
        let config = Config {
            bwlimit: Some("lots".to_string()),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.transfer.multiplier = 0.5;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "retry.transfer",
                ..
            })
        ));
    }

    #[test]
    fn test_chunk_size_is_capped() {
        let at_cap = Config {
            chunk_size: "256M".to_string(),
            ..Config::default()
        };
        assert_eq!(at_cap.chunk_size_bytes().unwrap(), 256 * 1024 * 1024);

        for huge in ["1P", "1T", "257M"] {
            let config = Config {
                chunk_size: huge.to_string(),
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    field: "chunkSize",
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_default_exclusions() {
        let filter = Config::default().exclude_filter().unwrap();

        for junk in [".DS_Store", "Thumbs.db", "._photo.jpg", "~$report.docx", "plan.boxnote"] {
            assert!(filter.is_excluded(junk), "{junk} should be excluded");
        }
        assert!(!filter.is_excluded("notes.txt"));
    }

    #[test]
    fn test_rejects_escaping_root() {
        let config = Config {
            roots: vec!["../elsewhere".to_string()],
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }
}
