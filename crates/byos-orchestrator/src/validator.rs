//! Post-run validation
//!
//! Probes every target that ended `Succeeded` or `Skipped` and reports one
//! advisory line per target. Nothing here changes outcomes or the exit code.

use crate::collaborators::Collaborators;
use crate::command_unit::{RepoListing, build_probe_unit};
use crate::config::{RunContext, RunMode};
use crate::log_sink::RunLog;
use crate::pool::{PoolConfig, WorkerPool};
use crate::protocol::ConversionOutcome;
use crate::resolver::Target;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Advisory result for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// VM name
    pub vm: String,
    /// Whether the post-condition held
    pub passed: bool,
    /// What was observed
    pub detail: String,
}

impl ValidationReport {
    fn pass(target: &Target, detail: impl Into<String>) -> Self {
        Self {
            vm: target.name.clone(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn warn(target: &Target, detail: impl Into<String>) -> Self {
        Self {
            vm: target.name.clone(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "✓" } else { "⚠" };
        write!(f, "{} {}: {}", mark, self.vm, self.detail)
    }
}

/// Read-only second pass over converted targets
pub struct PostRunValidator {
    ctx: Arc<RunContext>,
    collaborators: Collaborators,
}

impl PostRunValidator {
    /// Create a validator for a run
    pub fn new(ctx: Arc<RunContext>, collaborators: Collaborators) -> Self {
        Self { ctx, collaborators }
    }

    /// Validate eligible targets with the run's concurrency limit
    pub async fn validate(
        &self,
        outcomes: &[(Target, ConversionOutcome)],
        run_log: &Arc<RunLog>,
    ) -> Vec<ValidationReport> {
        let eligible: Vec<Target> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_validatable())
            .map(|(target, _)| target.clone())
            .collect();
        if eligible.is_empty() {
            run_log.info("No converted targets to validate");
            return Vec::new();
        }
        run_log.info(format!("Validating {} target(s)", eligible.len()));

        let pool = WorkerPool::new(PoolConfig {
            concurrency: self.ctx.concurrency(),
            inter_target_delay: Duration::ZERO,
        });
        let ctx = Arc::clone(&self.ctx);
        let collaborators = self.collaborators.clone();
        let log = Arc::clone(run_log);
        let results = pool
            .run(
                eligible,
                move |target: Target| {
                    let ctx = Arc::clone(&ctx);
                    let collaborators = collaborators.clone();
                    let log = Arc::clone(&log);
                    async move {
                        let report = check(&ctx, &collaborators, &target).await;
                        record(&log, &report);
                        report
                    }
                },
                |target, message| {
                    ValidationReport::warn(target, format!("validation crashed: {}", message))
                },
            )
            .await;

        let reports: Vec<ValidationReport> = results.into_iter().map(|(_, r)| r).collect();
        let passed = reports.iter().filter(|r| r.passed).count();
        run_log.info(format!(
            "Validation: {} passed, {} with warnings",
            passed,
            reports.len() - passed
        ));
        reports
    }
}

fn record(run_log: &Arc<RunLog>, report: &ValidationReport) {
    match run_log.target(&report.vm) {
        Ok(log) if report.passed => log.info(report.to_string()),
        Ok(log) => log.warn(report.to_string()),
        Err(e) => run_log.warn(format!("{} (target log unavailable: {})", report, e)),
    }
}

async fn check(ctx: &RunContext, collaborators: &Collaborators, target: &Target) -> ValidationReport {
    let expected = &ctx.profile().target_license;
    let license = match collaborators
        .metadata
        .license_type(ctx.group(), &target.name)
        .await
    {
        Ok(license) => license,
        Err(e) => return ValidationReport::warn(target, format!("could not read license type: {}", e)),
    };
    if &license != expected {
        return ValidationReport::warn(
            target,
            format!("license type is '{}', expected {}", license, expected),
        );
    }

    let output = match collaborators
        .executor
        .invoke(ctx.group(), &target.name, &build_probe_unit())
        .await
    {
        Ok(output) => output,
        Err(e) => return ValidationReport::warn(target, format!("repository probe failed: {}", e)),
    };
    let listing = RepoListing::parse(&output.output);

    match ctx.mode() {
        RunMode::Test => {
            let marker = &ctx.profile().test_marker_repo;
            let served = ctx
                .server()
                .map(|server| listing.rows_mentioning(server, marker))
                .unwrap_or(0);
            match (listing.mentions(marker), served) {
                (true, 0) => ValidationReport::warn(
                    target,
                    format!("test marker repository {} present but no registered repository", marker),
                ),
                (true, n) => ValidationReport::pass(
                    target,
                    format!("test marker repository {} present, {} registered repositories", marker, n),
                ),
                (false, _) => ValidationReport::warn(
                    target,
                    format!("test marker repository {} not found", marker),
                ),
            }
        }
        RunMode::Production => match ctx.server() {
            Some(server) if listing.mentions(server) => ValidationReport::pass(
                target,
                format!("{} repositories, served by {}", listing.count, server),
            ),
            Some(server) => ValidationReport::warn(
                target,
                format!("no repository points at {} ({} configured)", server, listing.count),
            ),
            None => ValidationReport::warn(target, "no registration server to check against"),
        },
        RunMode::SkipRegistration if listing.count == 0 => {
            ValidationReport::pass(target, "no repositories configured")
        }
        RunMode::SkipRegistration => ValidationReport::warn(
            target,
            format!("{} repositories still configured", listing.count),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines() {
        let target = Target {
            name: "vm1".into(),
            image_marker: String::new(),
        };
        assert_eq!(
            ValidationReport::pass(&target, "ok").to_string(),
            "✓ vm1: ok"
        );
        assert_eq!(
            ValidationReport::warn(&target, "probe failed").to_string(),
            "⚠ vm1: probe failed"
        );
    }
}
