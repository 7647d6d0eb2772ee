//! # BYOS conversion orchestrator
//!
//! Converts Azure VMs from pay-as-you-go to bring-your-own-subscription
//! licensing in batches. For every target VM the orchestrator checks the
//! license type, dispatches one remote command unit that wipes the
//! pay-as-you-go repositories and registers the VM with a management server,
//! flips the license type, and verifies it.
//!
//! Targets are processed by a bounded worker pool. Every step is recorded in
//! a per-run log directory holding `main.log` and one `<vm>.log` per target.
//! Outcomes are tallied into a [`RunSummary`] whose exit code is 1 iff any
//! target failed, and a [`PostRunValidator`] pass then probes the converted
//! VMs and reports advisory results.
//!
//! ## Example
//!
//! ```no_run
//! use azure_fleet::AzCli;
//! use byos_orchestrator::{Collaborators, ConversionRun, RunOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> byos_orchestrator::Result<()> {
//! let options = RunOptions::new("rg-sap-prod")
//!     .with_server("suma.example.com")
//!     .with_concurrency(4);
//! let run = ConversionRun::new(options, Collaborators::from_fleet(Arc::new(AzCli::new())));
//!
//! let prepared = run.preflight().await?;
//! let report = prepared.execute().await?;
//! std::process::exit(report.summary.exit_code());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod cleanup;
mod collaborators;
mod command_unit;
mod config;
mod credentials;
mod error;
mod log_sink;
mod pool;
mod protocol;
mod resolver;
mod run;
mod summary;
mod validation;
mod validator;

pub use cleanup::{BackupCleanup, CleanupOutcome, CleanupReport};
pub use collaborators::Collaborators;
pub use command_unit::{
    CommandUnit, RepoListing, build_backup_cleanup_unit, build_command_unit, build_probe_unit,
};
pub use config::{
    ConversionProfile, DEFAULT_INTER_TARGET_DELAY, DEFAULT_LOG_ROOT, RunContext,
    RunContextBuilder, RunMode, RunOptions, Scope,
};
pub use credentials::{
    ACTIVATION_KEY_ENV, ActivationSecret, CredentialProvider, CredentialRequest,
    CredentialSource, ResolvedCredential,
};
pub use error::{Error, Result};
pub use log_sink::{MAIN_LOG, RunLog, Severity, TargetLog, run_log_dir};
pub use pool::{PoolConfig, WorkerPool};
pub use protocol::{ConversionOutcome, ConversionProtocol, Stage};
pub use resolver::{Target, TargetResolver};
pub use run::{ConversionRun, PreparedRun, RunReport};
pub use summary::RunSummary;
pub use validation::{validate_group, validate_server_hostname, validate_vm_name};
pub use validator::{PostRunValidator, ValidationReport};
