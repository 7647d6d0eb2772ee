//! Removal of repository backups once conversions are validated

use crate::collaborators::Collaborators;
use crate::command_unit::build_backup_cleanup_unit;
use crate::config::ConversionProfile;
use crate::log_sink::{RunLog, Severity};
use crate::pool::{PoolConfig, WorkerPool};
use crate::resolver::Target;
use azure_fleet::RemoteScript;
use comfy_table::{Cell, Color, Table};
use std::sync::Arc;
use std::time::Duration;

/// Result of cleaning one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The script ran; `detail` is its last output line
    Completed {
        /// What the script reported
        detail: String,
    },
    /// The script could not be dispatched
    Failed {
        /// Raw collaborator error text
        cause: String,
    },
}

/// Outcomes of a cleanup run, in target order
#[derive(Debug, Clone)]
pub struct CleanupReport {
    /// Per-target outcomes
    pub outcomes: Vec<(Target, CleanupOutcome)>,
}

impl CleanupReport {
    /// Number of targets that failed
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CleanupOutcome::Failed { .. }))
            .count()
    }

    /// 0 when every dispatch went through, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 { 0 } else { 1 }
    }

    /// Per-target table; `styled` enables colours on a terminal
    pub fn table(&self, styled: bool) -> Table {
        let mut table = Table::new();
        if !styled {
            table.force_no_tty();
        }
        table.set_header(vec!["VM", "RESULT", "DETAIL"]);
        for (target, outcome) in &self.outcomes {
            let (result, color, detail) = match outcome {
                CleanupOutcome::Completed { detail } => ("done", Color::Green, detail.as_str()),
                CleanupOutcome::Failed { cause } => (
                    "failed",
                    Color::Red,
                    cause.lines().next().unwrap_or_default(),
                ),
            };
            table.add_row(vec![
                Cell::new(&target.name),
                Cell::new(result).fg(color),
                Cell::new(detail),
            ]);
        }
        table
    }

    /// Write the table and counts to `main.log`
    pub fn write_to(&self, log: &RunLog) {
        log.record_file_only(Severity::Info, self.table(false).to_string());
        let failed = self.failed();
        let line = format!(
            "Cleaned: {}  Failed: {}  Total: {}",
            self.outcomes.len() - failed,
            failed,
            self.outcomes.len()
        );
        let severity = if failed > 0 {
            Severity::Error
        } else {
            Severity::Info
        };
        log.record_file_only(severity, line);
    }
}

/// Deletes the repository backup directory on each target
pub struct BackupCleanup {
    group: String,
    concurrency: usize,
    script: RemoteScript,
    collaborators: Collaborators,
}

impl BackupCleanup {
    /// Create a cleanup job for targets in `group`
    pub fn new(
        group: impl Into<String>,
        concurrency: usize,
        profile: &ConversionProfile,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            group: group.into(),
            concurrency,
            script: build_backup_cleanup_unit(profile),
            collaborators,
        }
    }

    /// Run the cleanup on every target
    pub async fn run(&self, targets: Vec<Target>, run_log: &Arc<RunLog>) -> CleanupReport {
        run_log.info(format!(
            "Removing repository backups on {} target(s) in {}",
            targets.len(),
            self.group
        ));
        let pool = WorkerPool::new(PoolConfig {
            concurrency: self.concurrency,
            inter_target_delay: Duration::ZERO,
        });

        let group = self.group.clone();
        let script = Arc::new(self.script.clone());
        let collaborators = self.collaborators.clone();
        let log = Arc::clone(run_log);
        let crash_log = Arc::clone(run_log);
        let outcomes = pool
            .run(
                targets,
                move |target: Target| {
                    let group = group.clone();
                    let script = Arc::clone(&script);
                    let collaborators = collaborators.clone();
                    let log = Arc::clone(&log);
                    async move {
                        let target_log = match log.target(&target.name) {
                            Ok(target_log) => target_log,
                            Err(e) => {
                                return CleanupOutcome::Failed {
                                    cause: e.to_string(),
                                };
                            }
                        };
                        target_log.info("Removing repository backup");
                        match collaborators
                            .executor
                            .invoke(&group, &target.name, &script)
                            .await
                        {
                            Ok(output) => {
                                target_log.info(&output.output);
                                let detail = output
                                    .output
                                    .lines()
                                    .rev()
                                    .map(str::trim)
                                    .find(|l| !l.is_empty())
                                    .unwrap_or("no output")
                                    .to_string();
                                CleanupOutcome::Completed { detail }
                            }
                            Err(e) => {
                                target_log.error(format!("Cleanup failed: {}", e));
                                CleanupOutcome::Failed {
                                    cause: e.to_string(),
                                }
                            }
                        }
                    }
                },
                move |target, message| {
                    crash_log.error(format!("Cleanup of {} crashed: {}", target.name, message));
                    CleanupOutcome::Failed {
                        cause: format!("worker crashed: {}", message),
                    }
                },
            )
            .await;

        CleanupReport { outcomes }
    }
}
