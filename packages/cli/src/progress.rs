//! Progress bar utilities for the CLI.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use treemirror_engine::ProgressSnapshot;

/// Progress bar manager for a replication run.
pub struct ProgressManager {
    multi: MultiProgress,
    enabled: bool,
}

impl ProgressManager {
    /// Create a new progress manager.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            enabled,
        }
    }

    /// Create the byte progress bar for the run.
    ///
    /// If progress is disabled, returns a hidden progress bar.
    #[must_use]
    pub fn create_transfer_bar(&self) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }

        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "  {prefix:<9} [{bar:25.green/dim}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
                )
                .expect("Invalid progress bar template")
                .progress_chars("━━─"),
        );
        pb.set_prefix("Listing");
        pb
    }

    /// Clear any active progress bars (for clean output after completion).
    pub fn clear(&self) {
        self.multi.clear().ok();
    }
}

/// Reflect `snapshot` in `bar`.
pub fn update_bar(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    if snapshot.listing_complete {
        bar.set_prefix("Copying");
    }
    bar.set_length(snapshot.bytes_total);
    bar.set_position(snapshot.bytes_transferred);

    let finished =
        snapshot.items_done + snapshot.items_failed + snapshot.items_would_transfer;
    let mut message = format!(
        "{finished}/{} items, {} active",
        snapshot.items_total, snapshot.active_workers
    );
    if snapshot.retries > 0 {
        message.push_str(&format!(", {} retried", snapshot.retries));
    }
    if snapshot.items_failed > 0 {
        message.push_str(&format!(", {} failed", snapshot.items_failed));
    }
    bar.set_message(message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bar_tracks_bytes_and_items() {
        let bar = ProgressBar::hidden();
        let snapshot = ProgressSnapshot {
            bytes_transferred: 30,
            bytes_total: 60,
            items_total: 3,
            items_done: 1,
            items_failed: 1,
            active_workers: 1,
            listing_complete: true,
            ..ProgressSnapshot::default()
        };

        update_bar(&bar, &snapshot);

        assert_eq!(bar.position(), 30);
        assert_eq!(bar.length(), Some(60));
        assert_eq!(bar.prefix(), "Copying");
        assert_eq!(bar.message(), "2/3 items, 1 active, 1 failed");
    }
}
