//! Configuration loading for treemirror.
//!
//! Settings come from an optional TOML file (`treemirror.toml`) layered under
//! command-line overrides. Every knob has a default, so a run without any
//! config file is valid.
//!
//! # Example
//!
//! ```rust,ignore
//! use treemirror_config::{ConfigOverrides, load_config};
//!
//! let mut loaded = load_config(None, &cwd)?;
//! loaded.config.apply_overrides(ConfigOverrides {
//!     transfers: Some(8),
//!     ..Default::default()
//! });
//! loaded.config.validate()?;
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod discovery;
mod error;
mod rate;
mod toml_loader;
mod types;

pub use discovery::{CONFIG_FILE_NAME, discover_config};
pub use error::ConfigError;
pub use rate::{parse_rate, parse_size};
pub use toml_loader::load_toml_config;
pub use types::{
    Config, ConfigOverrides, DEFAULT_CHECKPOINT_FILE, LoadedConfig, MAX_CHUNK_SIZE, RetryConfig,
    RetrySettings,
};

use std::path::Path;

/// Discover and load the configuration.
///
/// # Arguments
///
/// * `explicit` - Config path passed on the command line, if any
/// * `cwd` - The working directory
///
/// # Errors
///
/// * If an explicit config file does not exist
/// * If the file cannot be read or parsed
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig, ConfigError> {
    let Some(path) = discover_config(explicit, cwd)? else {
        return Ok(LoadedConfig {
            config: Config::default(),
            config_path: None,
        });
    };

    let config = load_toml_config(&path)?;
    Ok(LoadedConfig {
        config,
        config_path: Some(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let loaded = load_config(None, dir.path()).unwrap();

        // A user-level config may exist on the machine running the tests.
        if loaded.config_path.is_none() {
            assert_eq!(loaded.config, Config::default());
        }
    }

    #[test]
    fn test_load_config_from_cwd() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "checkers = 2").unwrap();

        let loaded = load_config(None, dir.path()).unwrap();

        assert_eq!(loaded.config.checkers, 2);
        assert_eq!(loaded.config_path, Some(dir.path().join(CONFIG_FILE_NAME)));
    }
}
