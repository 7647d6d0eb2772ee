//! Run summary and exit code

use crate::log_sink::{RunLog, Severity};
use crate::protocol::ConversionOutcome;
use crate::resolver::Target;
use comfy_table::{Cell, Color, Table};

/// Tally of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Targets found
    pub total: usize,
    /// Targets converted, verified or not
    pub succeeded: usize,
    /// Converted targets whose license type did not read back as expected
    pub unverified: usize,
    /// Targets that were already converted
    pub skipped: usize,
    /// Targets that failed
    pub failed: usize,
    rows: Vec<(String, ConversionOutcome)>,
}

impl RunSummary {
    /// Tally outcomes, keeping their order for the report
    pub fn from_outcomes(outcomes: &[(Target, ConversionOutcome)]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            succeeded: 0,
            unverified: 0,
            skipped: 0,
            failed: 0,
            rows: Vec::with_capacity(outcomes.len()),
        };
        for (target, outcome) in outcomes {
            match outcome {
                ConversionOutcome::Succeeded { license_verified } => {
                    summary.succeeded += 1;
                    if !license_verified {
                        summary.unverified += 1;
                    }
                }
                ConversionOutcome::Skipped => summary.skipped += 1,
                ConversionOutcome::Failed { .. } => summary.failed += 1,
            }
            summary.rows.push((target.name.clone(), outcome.clone()));
        }
        summary
    }

    /// 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 { 0 } else { 1 }
    }

    /// One-line counts
    pub fn counts_line(&self) -> String {
        format!(
            "Succeeded: {}  Skipped: {}  Failed: {}  Total: {}",
            self.succeeded, self.skipped, self.failed, self.total
        )
    }

    /// Per-target table; `styled` enables colours on a terminal
    pub fn table(&self, styled: bool) -> Table {
        let mut table = Table::new();
        if !styled {
            table.force_no_tty();
        }
        table.set_header(vec!["VM", "RESULT", "DETAIL"]);
        for (vm, outcome) in &self.rows {
            let (result, color, detail) = match outcome {
                ConversionOutcome::Succeeded {
                    license_verified: true,
                } => ("succeeded", Color::Green, String::new()),
                ConversionOutcome::Succeeded {
                    license_verified: false,
                } => (
                    "succeeded (license unverified)",
                    Color::Yellow,
                    "license type did not read back yet".to_string(),
                ),
                ConversionOutcome::Skipped => {
                    ("skipped", Color::DarkGrey, "already converted".to_string())
                }
                ConversionOutcome::Failed { stage, cause } => (
                    "failed",
                    Color::Red,
                    format!("{}: {}", stage, cause.lines().next().unwrap_or_default()),
                ),
            };
            table.add_row(vec![
                Cell::new(vm),
                Cell::new(result).fg(color),
                Cell::new(detail),
            ]);
        }
        table
    }

    /// Write the table and counts to `main.log`
    pub fn write_to(&self, log: &RunLog) {
        log.record_file_only(Severity::Info, "Run summary");
        log.record_file_only(Severity::Info, self.table(false).to_string());
        let severity = if self.failed > 0 {
            Severity::Error
        } else {
            Severity::Info
        };
        log.record_file_only(severity, self.counts_line());
        if self.unverified > 0 {
            log.record_file_only(
                Severity::Warn,
                format!(
                    "{} converted target(s) did not report the new license type yet",
                    self.unverified
                ),
            );
        }
    }
}
