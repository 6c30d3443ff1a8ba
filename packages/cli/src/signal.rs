//! SIGINT/SIGTERM handling.
//!
//! The first signal asks the engine to stop and flush its checkpoint. A second
//! one exits immediately with status 130.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

/// Exit status after a second stop signal.
const EXIT_INTERRUPTED: i32 = 130;

/// Install the handlers and return the flag they set.
///
/// # Errors
///
/// * If a handler cannot be registered
pub fn install() -> io::Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        // Registered first so it only sees the flag a previous signal set.
        flag::register_conditional_shutdown(signal, EXIT_INTERRUPTED, Arc::clone(&stop))?;
        flag::register(signal, Arc::clone(&stop))?;
    }
    Ok(stop)
}
