//! Run summary plus JSON and CSV reports.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::checkpoint::write_atomic;
use crate::error::EngineError;

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every item is done (or would be, in a dry run).
    Pass,
    /// At least one item failed.
    Fail,
    /// A stop signal ended the run early.
    Interrupted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// An item that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    /// Relative path.
    pub path: String,
    /// Attempts made.
    pub attempts: u32,
    /// Last error.
    pub error: String,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Source store descriptor.
    pub source: String,
    /// Destination store descriptor.
    pub destination: String,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Items copied and verified, sorted.
    pub done: Vec<String>,
    /// Items that exhausted their retries, sorted by path.
    pub failed: Vec<FailedItem>,
    /// Items a dry run would copy, sorted.
    pub would_transfer: Vec<String>,
    /// Items identical at the destination.
    pub skipped: u64,
    /// Items skipped because an earlier run completed them.
    pub resumed: u64,
    /// Excluded objects.
    pub excluded: u64,
    /// Items left unfinished by an interruption.
    pub pending: u64,
    /// Bytes copied.
    pub bytes_transferred: u64,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Whether a stop signal ended the run.
    pub interrupted: bool,
}

impl RunSummary {
    /// Verdict of the run.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if self.failed.is_empty() {
            RunStatus::Pass
        } else {
            RunStatus::Fail
        }
    }

    /// Process exit code: 0 on a clean pass, 1 for failed items or an interruption.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            RunStatus::Pass => 0,
            RunStatus::Fail | RunStatus::Interrupted => 1,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportCounts {
    done: usize,
    failed: usize,
    would_transfer: usize,
    skipped: u64,
    resumed: u64,
    excluded: u64,
    pending: u64,
    bytes_transferred: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    generated_at: u64,
    elapsed_seconds: f64,
    source: &'a str,
    destination: &'a str,
    dry_run: bool,
    status: RunStatus,
    counts: ReportCounts,
    failed: &'a [FailedItem],
    would_transfer: &'a [String],
}

/// Write `summary` to `path` as a JSON document, replacing it atomically.
///
/// # Errors
///
/// * `ReportWrite` if the file cannot be written
pub fn write_report(path: &Path, summary: &RunSummary) -> Result<(), EngineError> {
    let report = Report {
        generated_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
        elapsed_seconds: summary.elapsed.as_secs_f64(),
        source: &summary.source,
        destination: &summary.destination,
        dry_run: summary.dry_run,
        status: summary.status(),
        counts: ReportCounts {
            done: summary.done.len(),
            failed: summary.failed.len(),
            would_transfer: summary.would_transfer.len(),
            skipped: summary.skipped,
            resumed: summary.resumed,
            excluded: summary.excluded,
            pending: summary.pending,
            bytes_transferred: summary.bytes_transferred,
        },
        failed: &summary.failed,
        would_transfer: &summary.would_transfer,
    };

    let write_error = |source| EngineError::ReportWrite {
        path: path.to_path_buf(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(&report)
        .map_err(|e| write_error(std::io::Error::other(e)))?;
    write_atomic(path, &bytes, false).map_err(write_error)?;

    log::debug!("Wrote report {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct IssueRow<'a> {
    issue: &'static str,
    path: &'a str,
    attempts: Option<u32>,
    error: Option<&'a str>,
}

/// Write the items that need attention to `path` as CSV, replacing it
/// atomically.
///
/// One row per failed item (`failed`) and per item a dry run would copy
/// (`would_transfer`), under the header `issue,path,attempts,error`.
///
/// # Errors
///
/// * `ReportWrite` if the file cannot be written
pub fn write_csv_report(path: &Path, summary: &RunSummary) -> Result<(), EngineError> {
    let write_error = |source| EngineError::ReportWrite {
        path: path.to_path_buf(),
        source,
    };

    let failed = summary.failed.iter().map(|item| IssueRow {
        issue: "failed",
        path: &item.path,
        attempts: Some(item.attempts),
        error: Some(&item.error),
    });
    let would_transfer = summary.would_transfer.iter().map(|item| IssueRow {
        issue: "would_transfer",
        path: item,
        attempts: None,
        error: None,
    });

    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in failed.chain(would_transfer) {
        writer
            .serialize(row)
            .map_err(|e| write_error(std::io::Error::from(e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| write_error(e.into_error()))?;
    write_atomic(path, &bytes, false).map_err(write_error)?;

    log::debug!("Wrote CSV report {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        RunSummary {
            source: "memory:src".to_string(),
            destination: "memory:dst".to_string(),
            dry_run: false,
            done: vec!["a.txt".to_string()],
            failed: Vec::new(),
            would_transfer: Vec::new(),
            skipped: 2,
            resumed: 0,
            excluded: 1,
            pending: 0,
            bytes_transferred: 10,
            elapsed: Duration::from_millis(1500),
            interrupted: false,
        }
    }

    #[test]
    fn test_status_and_exit_code() {
        let mut summary = summary();
        assert_eq!(summary.status(), RunStatus::Pass);
        assert_eq!(summary.exit_code(), 0);

        summary.failed.push(FailedItem {
            path: "b.txt".to_string(),
            attempts: 5,
            error: "denied".to_string(),
        });
        assert_eq!(summary.status(), RunStatus::Fail);
        assert_eq!(summary.exit_code(), 1);

        summary.interrupted = true;
        assert_eq!(summary.status(), RunStatus::Interrupted);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_report_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reports/run.json");
        let mut summary = summary();
        summary.failed.push(FailedItem {
            path: "b.txt".to_string(),
            attempts: 3,
            error: "denied".to_string(),
        });

        write_report(&path, &summary).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["elapsedSeconds"], 1.5);
        assert_eq!(json["counts"]["done"], 1);
        assert_eq!(json["counts"]["bytesTransferred"], 10);
        assert_eq!(json["failed"][0]["path"], "b.txt");
        assert_eq!(json["failed"][0]["attempts"], 3);
        assert!(json["generatedAt"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_csv_report_lists_items_needing_attention() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.csv");
        let mut summary = summary();
        summary.failed.push(FailedItem {
            path: "b, final.txt".to_string(),
            attempts: 3,
            error: "denied".to_string(),
        });
        summary.would_transfer.push("c.txt".to_string());

        write_csv_report(&path, &summary).unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "issue,path,attempts,error",
                "failed,\"b, final.txt\",3,denied",
                "would_transfer,c.txt,,",
            ]
        );
    }

    #[test]
    fn test_csv_report_replaces_previous_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.csv");
        std::fs::write(&path, "stale").unwrap();

        write_csv_report(&path, &summary()).unwrap();

        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(!csv.contains("stale"));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
