//! Per-target conversion protocol
//!
//! ```text
//! LicenseCheck ──already converted──▶ Skipped
//!      │
//!      ▼
//! CleanupRegister ──▶ LicenseUpdate ──▶ LicenseVerify ──▶ Succeeded
//! ```
//!
//! Any error in the first three steps ends the target in `Failed` with the
//! stage and the raw collaborator error. A verification mismatch only
//! flags the success.

use crate::collaborators::Collaborators;
use crate::command_unit::{CommandUnit, build_command_unit};
use crate::config::RunContext;
use crate::log_sink::TargetLog;
use crate::resolver::Target;
use futures::future::{Either, select};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Protocol step a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading the current license type
    LicenseCheck,
    /// Dispatching the cleanup and registration unit
    CleanupRegister,
    /// Setting the license type
    LicenseUpdate,
    /// Re-reading the license type
    LicenseVerify,
    /// The worker died without reporting a stage
    Unknown,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::LicenseCheck => write!(f, "license check"),
            Stage::CleanupRegister => write!(f, "cleanup and registration"),
            Stage::LicenseUpdate => write!(f, "license update"),
            Stage::LicenseVerify => write!(f, "license verify"),
            Stage::Unknown => write!(f, "unknown"),
        }
    }
}

/// Terminal result of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Converted; `license_verified` is false when the re-read disagreed
    Succeeded {
        /// Whether the license type read back as expected
        license_verified: bool,
    },
    /// Already converted, nothing done
    Skipped,
    /// Conversion stopped at `stage`
    Failed {
        /// Step that failed
        stage: Stage,
        /// Raw collaborator error text
        cause: String,
    },
}

impl ConversionOutcome {
    /// Failure caught at the pool boundary
    pub fn crashed(cause: impl Into<String>) -> Self {
        ConversionOutcome::Failed {
            stage: Stage::Unknown,
            cause: cause.into(),
        }
    }

    /// True for `Failed`
    pub fn is_failed(&self) -> bool {
        matches!(self, ConversionOutcome::Failed { .. })
    }

    /// True for outcomes the post-run validator looks at
    pub fn is_validatable(&self) -> bool {
        !self.is_failed()
    }
}

impl fmt::Display for ConversionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionOutcome::Succeeded {
                license_verified: true,
            } => write!(f, "succeeded"),
            ConversionOutcome::Succeeded {
                license_verified: false,
            } => write!(f, "succeeded (license unverified)"),
            ConversionOutcome::Skipped => write!(f, "skipped (already converted)"),
            ConversionOutcome::Failed { stage, cause } => {
                write!(f, "failed at {}: {}", stage, cause)
            }
        }
    }
}

enum State {
    LicenseCheck,
    CleanupRegister,
    LicenseUpdate,
    LicenseVerify,
    Done(ConversionOutcome),
}

fn fail(log: &TargetLog, stage: Stage, error: impl fmt::Display) -> State {
    let cause = error.to_string();
    log.error(format!("{} failed: {}", capitalize(&stage.to_string()), cause));
    State::Done(ConversionOutcome::Failed { stage, cause })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Await `future`, calling `beat` with the elapsed time every `interval`
pub(crate) async fn with_heartbeat<F, T>(
    future: F,
    interval: Duration,
    mut beat: impl FnMut(Duration),
) -> T
where
    F: Future<Output = T>,
{
    if interval.is_zero() {
        return future.await;
    }
    let started = Instant::now();
    let mut future = pin!(future);
    loop {
        match select(future.as_mut(), smol::Timer::after(interval)).await {
            Either::Left((value, _)) => return value,
            Either::Right(_) => beat(started.elapsed()),
        }
    }
}

/// Runs the conversion steps for one target at a time
pub struct ConversionProtocol {
    ctx: Arc<RunContext>,
    collaborators: Collaborators,
    unit: CommandUnit,
}

impl ConversionProtocol {
    /// Build the protocol and its command unit for a run
    pub fn new(ctx: Arc<RunContext>, collaborators: Collaborators) -> Self {
        let unit = build_command_unit(ctx.mode(), ctx.profile(), ctx.secret(), ctx.server());
        Self {
            ctx,
            collaborators,
            unit,
        }
    }

    /// The unit dispatched to every target
    pub fn command_unit(&self) -> &CommandUnit {
        &self.unit
    }

    /// Convert one target and report how it ended
    pub async fn run(&self, target: &Target, log: &TargetLog) -> ConversionOutcome {
        log.info(format!(
            "Starting conversion of {} ({} mode, image {})",
            target.name,
            self.ctx.mode(),
            target.image_marker
        ));

        let mut state = State::LicenseCheck;
        let outcome = loop {
            state = match state {
                State::LicenseCheck => self.check_license(target, log).await,
                State::CleanupRegister => self.cleanup_and_register(target, log).await,
                State::LicenseUpdate => self.update_license(target, log).await,
                State::LicenseVerify => self.verify_license(target, log).await,
                State::Done(outcome) => break outcome,
            };
        };

        match &outcome {
            ConversionOutcome::Failed { .. } => log.error(format!("Result: {}", outcome)),
            ConversionOutcome::Succeeded {
                license_verified: false,
            } => log.warn(format!("Result: {}", outcome)),
            _ => log.info(format!("Result: {}", outcome)),
        }
        outcome
    }

    async fn check_license(&self, target: &Target, log: &TargetLog) -> State {
        let expected = &self.ctx.profile().target_license;
        match self
            .collaborators
            .metadata
            .license_type(self.ctx.group(), &target.name)
            .await
        {
            Ok(current) if &current == expected => {
                log.info(format!("License type is already {}, nothing to do", expected));
                State::Done(ConversionOutcome::Skipped)
            }
            Ok(current) => {
                let shown = if current.is_empty() {
                    "none (pay-as-you-go)"
                } else {
                    current.as_str()
                };
                log.info(format!("Current license type: {}", shown));
                State::CleanupRegister
            }
            Err(e) => fail(log, Stage::LicenseCheck, e),
        }
    }

    async fn cleanup_and_register(&self, target: &Target, log: &TargetLog) -> State {
        log.info(format!(
            "Dispatching remote command: {}",
            self.unit.steps().join(", ")
        ));
        let started = Instant::now();
        let dispatch =
            self.collaborators
                .executor
                .invoke(self.ctx.group(), &target.name, self.unit.script());
        let result = with_heartbeat(dispatch, self.ctx.profile().heartbeat_interval, |elapsed| {
            log.info(format!(
                "Still waiting for remote command ({}s elapsed)",
                elapsed.as_secs()
            ))
        })
        .await;

        match result {
            Ok(output) => {
                log.info(format!(
                    "Remote command finished after {}s",
                    started.elapsed().as_secs()
                ));
                log.info(&output.output);
                if !output.success() {
                    log.warn(format!(
                        "Remote command reported status {}, see output above",
                        output.exit_status
                    ));
                }
                State::LicenseUpdate
            }
            Err(e) => fail(log, Stage::CleanupRegister, e),
        }
    }

    async fn update_license(&self, target: &Target, log: &TargetLog) -> State {
        let expected = &self.ctx.profile().target_license;
        match self
            .collaborators
            .metadata
            .set_license_type(self.ctx.group(), &target.name, expected)
            .await
        {
            Ok(()) => {
                log.info(format!("License type set to {}", expected));
                State::LicenseVerify
            }
            Err(e) => fail(log, Stage::LicenseUpdate, e),
        }
    }

    async fn verify_license(&self, target: &Target, log: &TargetLog) -> State {
        let expected = &self.ctx.profile().target_license;
        let verified = match self
            .collaborators
            .metadata
            .license_type(self.ctx.group(), &target.name)
            .await
        {
            Ok(current) if &current == expected => {
                log.info(format!("Verified license type {}", expected));
                true
            }
            Ok(current) => {
                log.warn(format!(
                    "License type reads '{}' after the update, expected {}; it may not have propagated yet",
                    current, expected
                ));
                false
            }
            Err(e) => {
                log.warn(format!("Could not re-read license type: {}", e));
                false
            }
        };
        State::Done(ConversionOutcome::Succeeded {
            license_verified: verified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_rendering() {
        let ok = ConversionOutcome::Succeeded {
            license_verified: true,
        };
        let lagging = ConversionOutcome::Succeeded {
            license_verified: false,
        };
        let failed = ConversionOutcome::Failed {
            stage: Stage::LicenseUpdate,
            cause: "vm update failed".into(),
        };

        assert_eq!(ok.to_string(), "succeeded");
        assert_eq!(lagging.to_string(), "succeeded (license unverified)");
        assert_eq!(ConversionOutcome::Skipped.to_string(), "skipped (already converted)");
        assert_eq!(failed.to_string(), "failed at license update: vm update failed");

        assert!(ok.is_validatable());
        assert!(ConversionOutcome::Skipped.is_validatable());
        assert!(!failed.is_validatable());
        assert!(ConversionOutcome::crashed("boom").is_failed());
    }

    #[test]
    fn test_heartbeat_beats_while_waiting() {
        smol::block_on(async {
            let mut beats = Vec::new();
            let value = with_heartbeat(
                async {
                    smol::Timer::after(Duration::from_millis(120)).await;
                    7
                },
                Duration::from_millis(20),
                |elapsed| beats.push(elapsed),
            )
            .await;

            assert_eq!(value, 7);
            assert!(!beats.is_empty());
            assert!(beats.windows(2).all(|w| w[0] <= w[1]));
        });
    }

    #[test]
    fn test_heartbeat_silent_for_fast_futures() {
        smol::block_on(async {
            let mut beats = 0;
            let value = with_heartbeat(async { "done" }, Duration::from_secs(30), |_| beats += 1).await;
            assert_eq!(value, "done");
            assert_eq!(beats, 0);
        });
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("license check"), "License check");
        assert_eq!(capitalize(""), "");
    }
}
