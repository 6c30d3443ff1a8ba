//! Configuration file discovery.
//!
//! Looks for a config file in, in order:
//!
//! 1. The path given with `--config`
//! 2. `treemirror.toml` in the working directory
//! 3. `treemirror/config.toml` in the platform config directory

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "treemirror.toml";

/// Find the configuration file to use.
///
/// Returns `None` when no file exists and built-in defaults should apply.
///
/// # Arguments
///
/// * `explicit` - Path passed on the command line, if any
/// * `cwd` - The working directory
///
/// # Errors
///
/// * If `explicit` is given but does not exist
pub fn discover_config(
    explicit: Option<&Path>,
    cwd: &Path,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    let local = cwd.join(CONFIG_FILE_NAME);
    if local.is_file() {
        log::debug!("Using config {}", local.display());
        return Ok(Some(local));
    }

    let user = dirs::config_dir().map(|dir| dir.join("treemirror").join("config.toml"));
    if let Some(user) = user.filter(|p| p.is_file()) {
        log::debug!("Using config {}", user.display());
        return Ok(Some(user));
    }

    log::debug!("No config file found, using defaults");
    Ok(None)
}
