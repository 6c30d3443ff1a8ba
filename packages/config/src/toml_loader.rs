//! TOML configuration file loader.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::Config;

/// Load a TOML configuration file.
///
/// Keys missing from the file keep their defaults; unknown keys are ignored.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// * If the file cannot be read
/// * If the file cannot be parsed as TOML
pub fn load_toml_config(path: &Path) -> Result<Config, ConfigError> {
    log::debug!("Loading TOML config from {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    log::debug!(
        "Loaded config: transfers={} checkers={} bwlimit={:?}",
        config.transfers,
        config.checkers,
        config.bwlimit
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_toml_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
transfers = 2
checkers = 3
bwlimit = "100M"
chunkSize = "256K"
checkpoint = "/var/lib/treemirror/state.json"
caseInsensitive = true
roots = ["Projects", "Team A"]
exclude = ["*.boxnote"]

[retry.transfer]
maxAttempts = 3
baseDelayMs = 100
multiplier = 1.5
"#
        )
        .unwrap();

        let config = load_toml_config(file.path()).unwrap();

        assert_eq!(config.transfers, 2);
        assert_eq!(config.checkers, 3);
        assert_eq!(config.bwlimit.as_deref(), Some("100M"));
        assert_eq!(config.chunk_size_bytes().unwrap(), 256 * 1024);
        assert_eq!(
            config.checkpoint,
            PathBuf::from("/var/lib/treemirror/state.json")
        );
        assert!(config.case_insensitive);
        assert_eq!(config.roots, vec!["Projects", "Team A"]);
        assert_eq!(config.exclude, vec!["*.boxnote"]);
        assert_eq!(config.retry.transfer.max_attempts, 3);
        assert_eq!(config.retry.transfer.base_delay_ms, 100);
        assert_eq!(config.retry.listing.max_attempts, 5);
    }

    #[test]
    fn test_load_minimal_toml_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "transfers = 1").unwrap();

        let config = load_toml_config(file.path()).unwrap();

        assert_eq!(config.transfers, 1);
        assert_eq!(config.checkers, 8);
        assert!(!config.case_insensitive);
        assert!(config.exclude.contains(&".DS_Store".to_string()));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "transfers = 6\nfastList = true").unwrap();

        let config = load_toml_config(file.path()).unwrap();

        assert_eq!(config.transfers, 6);
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "transfers = \"many").unwrap();

        assert!(matches!(
            load_toml_config(file.path()),
            Err(ConfigError::TomlParseError { .. })
        ));
    }
}
