//! Run driver: pre-flight, conversion, summary, validation

use crate::collaborators::Collaborators;
use crate::config::RunOptions;
use crate::credentials::{CredentialProvider, CredentialRequest, ResolvedCredential};
use crate::log_sink::RunLog;
use crate::pool::{PoolConfig, WorkerPool};
use crate::protocol::{ConversionOutcome, ConversionProtocol};
use crate::resolver::{Target, TargetResolver};
use crate::summary::RunSummary;
use crate::validator::{PostRunValidator, ValidationReport};
use crate::Result;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// A conversion run that has not been checked yet
pub struct ConversionRun {
    options: RunOptions,
    collaborators: Collaborators,
}

impl ConversionRun {
    /// Create a run
    pub fn new(options: RunOptions, collaborators: Collaborators) -> Self {
        Self {
            options,
            collaborators,
        }
    }

    /// Validate arguments, check the session, resolve targets and the key
    ///
    /// Nothing on any target is touched. Steps run in that order and the
    /// first failure aborts the run.
    pub async fn preflight(self) -> Result<PreparedRun> {
        let started_at = Local::now();
        self.options.validate()?;
        self.collaborators.inventory.ensure_authenticated().await?;

        let scope = self.options.scope();
        let targets = TargetResolver::new(
            self.collaborators.inventory.as_ref(),
            &self.options.profile.family,
        )
        .resolve(&scope)
        .await?;
        info!("Found {} target(s) in {}", targets.len(), scope);

        let credential = CredentialProvider::new(self.collaborators.secrets.as_ref())
            .resolve(&CredentialRequest::from_options(&self.options))
            .await?;

        Ok(PreparedRun {
            options: self.options,
            collaborators: self.collaborators,
            targets,
            credential,
            started_at,
        })
    }
}

/// A run that passed pre-flight and waits for confirmation
pub struct PreparedRun {
    options: RunOptions,
    collaborators: Collaborators,
    targets: Vec<Target>,
    credential: ResolvedCredential,
    started_at: DateTime<Local>,
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunReport {
    /// Outcome per target, in resolver order
    pub outcomes: Vec<(Target, ConversionOutcome)>,
    /// Tally and exit code
    pub summary: RunSummary,
    /// Advisory validation results
    pub validation: Vec<ValidationReport>,
    /// Run log directory
    pub log_dir: PathBuf,
    /// Highest number of targets converted at once
    pub peak_concurrency: usize,
}

impl PreparedRun {
    /// Resolved targets
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Resolved credential
    pub fn credential(&self) -> &ResolvedCredential {
        &self.credential
    }

    /// When the operator started the run; names the log directory
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Options the run was prepared with
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Human-readable description of what the run will do
    pub fn plan(&self) -> Vec<String> {
        let opts = &self.options;
        let mut lines = vec![
            format!("Scope:               {}", opts.scope()),
            format!("Mode:                {}", opts.mode()),
            format!(
                "Registration server: {}",
                match (&opts.server, opts.mode().registers()) {
                    (Some(server), true) => server.as_str(),
                    _ => "(skipped)",
                }
            ),
            format!("Concurrency:         {}", opts.concurrency),
            format!("Activation key:      {}", self.credential.source),
        ];
        if let Some(preview) = &self.credential.preview {
            lines.push(format!("Key preview:         {}", preview));
        }
        lines.push(format!("Targets ({}):", self.targets.len()));
        for target in &self.targets {
            lines.push(format!("  - {} ({})", target.name, target.image_marker));
        }
        lines
    }

    /// Convert every target, then summarise and validate
    pub async fn execute(self) -> Result<RunReport> {
        let ctx = Arc::new(
            self.options
                .into_context(self.credential.secret.clone(), self.started_at),
        );
        let run_log = RunLog::create(ctx.log_dir())?;

        run_log.info(format!(
            "Converting {} target(s) in {} ({} mode, concurrency {})",
            self.targets.len(),
            ctx.scope(),
            ctx.mode(),
            ctx.concurrency()
        ));
        run_log.info(format!("Activation key: {}", self.credential.source));
        if let Some(preview) = &self.credential.preview {
            run_log.info(format!("Activation key preview: {}", preview));
        }
        run_log.info(format!("Logs: {}", run_log.dir().display()));

        let protocol = Arc::new(ConversionProtocol::new(
            Arc::clone(&ctx),
            self.collaborators.clone(),
        ));
        let pool = WorkerPool::new(PoolConfig {
            concurrency: ctx.concurrency(),
            inter_target_delay: ctx.inter_target_delay(),
        });

        let job_log = Arc::clone(&run_log);
        let crash_log = Arc::clone(&run_log);
        let outcomes = pool
            .run(
                self.targets,
                move |target: Target| {
                    let protocol = Arc::clone(&protocol);
                    let run_log = Arc::clone(&job_log);
                    async move {
                        match run_log.target(&target.name) {
                            Ok(log) => protocol.run(&target, &log).await,
                            Err(e) => {
                                run_log.error(format!(
                                    "Cannot open log for {}: {}",
                                    target.name, e
                                ));
                                ConversionOutcome::crashed(e.to_string())
                            }
                        }
                    }
                },
                move |target, message| {
                    let cause = format!("worker crashed: {}", message);
                    match crash_log.target(&target.name) {
                        Ok(log) => log.error(format!("Result: failed: {}", cause)),
                        Err(_) => crash_log.error(format!("{}: {}", target.name, cause)),
                    }
                    ConversionOutcome::crashed(cause)
                },
            )
            .await;

        let summary = RunSummary::from_outcomes(&outcomes);
        summary.write_to(&run_log);

        let validation = PostRunValidator::new(Arc::clone(&ctx), self.collaborators)
            .validate(&outcomes, &run_log)
            .await;

        run_log.info(format!("Run finished with exit code {}", summary.exit_code()));

        Ok(RunReport {
            outcomes,
            summary,
            validation,
            log_dir: run_log.dir().to_path_buf(),
            peak_concurrency: pool.peak_active(),
        })
    }
}
