//! Cooperative cancellation.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// A shared stop flag.
///
/// Clones observe the same flag. A token can additionally watch a flag owned
/// by someone else, such as the one a signal handler sets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    external: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also reports cancelled once `flag` is set.
    #[must_use]
    pub fn with_external(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            external: Some(flag),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .external
                .as_ref()
                .is_some_and(|external| external.load(Ordering::SeqCst))
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if cancelled.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
