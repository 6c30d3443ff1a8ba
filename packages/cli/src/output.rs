//! Terminal output formatting.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use colored::Colorize;
use treemirror_engine::{RunStatus, RunSummary};

/// Print a header message.
pub fn print_header(message: &str) {
    println!("\n{} {}\n", "🪞", message.bold());
}

/// Print the roots of the run.
pub fn print_run_info(source: &str, destination: &str, dry_run: bool) {
    println!("Source:      {}", source.cyan());
    println!("Destination: {}", destination.cyan());
    if dry_run {
        println!("{}", "Dry run: nothing will be written".yellow());
    }
    println!();
}

/// Render a byte count with binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Print the end-of-run summary, enumerating failed items.
pub fn print_summary(summary: &RunSummary) {
    println!();
    if summary.dry_run {
        println!(
            "{} {} item(s) would be transferred",
            "•".dimmed(),
            summary.would_transfer.len()
        );
        for path in &summary.would_transfer {
            println!("    {}", path.dimmed());
        }
    } else {
        println!(
            "{} {} item(s) transferred ({})",
            "✓".green(),
            summary.done.len(),
            format_bytes(summary.bytes_transferred)
        );
    }
    println!(
        "{} {} unchanged, {} already done, {} excluded",
        "•".dimmed(),
        summary.skipped,
        summary.resumed,
        summary.excluded
    );

    if !summary.failed.is_empty() {
        println!("{} {} item(s) failed:", "✗".red(), summary.failed.len());
        for item in &summary.failed {
            println!(
                "    {} {}",
                item.path.red(),
                format!("({} attempt(s): {})", item.attempts, item.error).dimmed()
            );
        }
    }

    println!();
    match summary.status() {
        RunStatus::Pass => println!(
            "{} Replication complete in {:.1}s",
            "✅",
            summary.elapsed.as_secs_f64()
        ),
        RunStatus::Fail => {
            print_warning("Some items failed. Re-run the same command to retry them.");
        }
        RunStatus::Interrupted => print_warning(&format!(
            "Interrupted with {} item(s) pending. Re-run the same command to resume.",
            summary.pending
        )),
    }
}

/// Print error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "Error:".red().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

/// Print a hint on how to recover from an error.
pub fn print_hint(message: &str) {
    eprintln!("{} {}", "Hint:".cyan().bold(), message);
}
