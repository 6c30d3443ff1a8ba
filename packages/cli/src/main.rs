//! treemirror CLI entry point.
//!
//! Replicates a source directory tree into a destination tree. Runs are
//! resumable through a checkpoint file, bounded by a bandwidth ceiling, and
//! spread over a fixed number of concurrent transfers.
//!
//! Exit codes: `0` when everything was replicated, `1` when some items failed
//! or the run was interrupted, `2` on a fatal error.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod args;
mod output;
mod progress;
mod signal;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use path_clean::PathClean;

use args::Args;
use progress::ProgressManager;
use treemirror_config::load_config;
use treemirror_engine::{
    CancelToken, EngineError, RunOptions, Scheduler, write_csv_report, write_report,
};
use treemirror_store::LocalStore;

/// Exit code for errors that abort the run.
const EXIT_FATAL: i32 = 2;

fn main() {
    let args = Args::parse();

    // Set up logging
    if args.verbose {
        // SAFETY: We're setting this before any other threads are spawned
        unsafe {
            env::set_var("RUST_LOG", "debug");
        }
    }
    pretty_env_logger::init();

    let stop = signal::install().unwrap_or_else(|e| {
        log::warn!("Cannot install signal handlers, Ctrl+C will not checkpoint: {e}");
        Arc::new(AtomicBool::new(false))
    });

    let code = match env::current_dir() {
        Ok(cwd) => run(&args, &cwd, stop).unwrap_or_else(|e| {
            output::print_error(&e.to_string());
            if let Some(hint) = e.downcast_ref::<EngineError>().and_then(hint_for) {
                output::print_hint(hint);
            }
            EXIT_FATAL
        }),
        Err(e) => {
            output::print_error(&format!("Cannot determine working directory: {e}"));
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}

/// Recovery advice for fatal engine errors.
fn hint_for(error: &EngineError) -> Option<&'static str> {
    match error {
        EngineError::CheckpointCorruption { .. } => Some(
            "Delete the checkpoint to start fresh, or restore the .bak file next to it.",
        ),
        EngineError::CheckpointMismatch { .. } => {
            Some("Pass --checkpoint to use a separate checkpoint for these directories.")
        }
        EngineError::ListingFailure { .. } => {
            Some("Nothing was copied. Check access to both directories and re-run.")
        }
        _ => None,
    }
}

/// Resolve a root given on the command line against `cwd` and normalize it.
fn resolve_root(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.clean()
    } else {
        cwd.join(path).clean()
    }
}

/// Main application logic. Returns the process exit code.
fn run(
    args: &Args,
    cwd: &Path,
    stop: Arc<AtomicBool>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let loaded = load_config(args.config.as_deref(), cwd)?;
    if let Some(path) = &loaded.config_path {
        log::debug!("Using config {}", path.display());
    }

    let mut config = loaded.config;
    config.apply_overrides(args.overrides());
    let mut options = RunOptions::from_config(&config, args.dry_run, args.verify)?;
    options.checkpoint_path = resolve_root(cwd, &options.checkpoint_path);

    let source = resolve_root(cwd, &args.source);
    let destination = resolve_root(cwd, &args.destination);
    if !source.is_dir() {
        return Err(format!("Source directory does not exist: {}", source.display()).into());
    }
    if source == destination || destination.starts_with(&source) {
        return Err(format!(
            "Destination {} must not be inside the source {}",
            destination.display(),
            source.display()
        )
        .into());
    }

    output::print_header("Tree Mirror");
    output::print_run_info(
        &source.to_string_lossy(),
        &destination.to_string_lossy(),
        args.dry_run,
    );

    let scheduler = Scheduler::new(
        Arc::new(LocalStore::new(source)),
        Arc::new(LocalStore::new(destination)),
        options,
        CancelToken::with_external(stop),
    );

    let progress_mgr = ProgressManager::new(args.should_show_progress());
    let bar = progress_mgr.create_transfer_bar();
    let result = scheduler.run(|snapshot| progress::update_bar(&bar, snapshot));
    bar.finish_and_clear();
    progress_mgr.clear();
    let summary = result?;

    if let Some(report) = &args.report {
        write_report(&resolve_root(cwd, report), &summary)?;
    }
    if let Some(report) = &args.report_csv {
        write_csv_report(&resolve_root(cwd, report), &summary)?;
    }

    output::print_summary(&summary);
    Ok(summary.exit_code())
}
