//! CLI argument definitions.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use clap::Parser;
use treemirror_config::ConfigOverrides;

/// CLI arguments for treemirror.
#[derive(Debug, Parser)]
#[command(
    name = "treemirror",
    about = "Replicate a directory tree, resumably and within a bandwidth budget",
    version
)]
pub struct Args {
    /// Directory to copy from.
    #[arg(index = 1)]
    pub source: PathBuf,

    /// Directory to copy into.
    #[arg(index = 2)]
    pub destination: PathBuf,

    /// Number of concurrent transfers.
    #[arg(long)]
    pub transfers: Option<usize>,

    /// Number of concurrent listing/metadata checks.
    #[arg(long)]
    pub checkers: Option<usize>,

    /// Bandwidth ceiling in bytes per second (e.g. 100M), or "off".
    #[arg(long)]
    pub bwlimit: Option<String>,

    /// Show what would be copied without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Re-compare items an earlier run already completed.
    #[arg(long)]
    pub verify: bool,

    /// Configuration file to use instead of the discovered one.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Checkpoint file (overrides config).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Write a JSON report of the run to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write failed and would-transfer items to this file as CSV.
    #[arg(long = "report-csv")]
    pub report_csv: Option<PathBuf>,

    /// Disable progress bars (useful for CI environments).
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Enable verbose output.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Args {
    /// Settings given on the command line, which take precedence over the config file.
    #[must_use]
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            transfers: self.transfers,
            checkers: self.checkers,
            bwlimit: self.bwlimit.clone(),
            checkpoint: self.checkpoint.clone(),
        }
    }

    /// Determine if we should show progress bars.
    #[must_use]
    pub const fn should_show_progress(&self) -> bool {
        !self.no_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_flags() {
        let args = Args::try_parse_from([
            "treemirror",
            "/mnt/old",
            "/mnt/new",
            "--transfers=8",
            "--checkers",
            "16",
            "--bwlimit=100M",
            "--dry-run",
            "--report",
            "run.json",
            "--report-csv",
            "issues.csv",
        ])
        .unwrap();

        assert_eq!(args.source, PathBuf::from("/mnt/old"));
        assert_eq!(args.destination, PathBuf::from("/mnt/new"));
        assert!(args.dry_run);
        assert!(!args.verify);
        assert_eq!(args.report, Some(PathBuf::from("run.json")));
        assert_eq!(args.report_csv, Some(PathBuf::from("issues.csv")));

        let overrides = args.overrides();
        assert_eq!(overrides.transfers, Some(8));
        assert_eq!(overrides.checkers, Some(16));
        assert_eq!(overrides.bwlimit.as_deref(), Some("100M"));
        assert_eq!(overrides.checkpoint, None);
    }

    #[test]
    fn test_requires_both_roots() {
        assert!(Args::try_parse_from(["treemirror", "/mnt/old"]).is_err());
    }
}
