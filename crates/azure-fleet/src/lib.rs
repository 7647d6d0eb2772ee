//! # Azure fleet access
//!
//! The conversion orchestrator talks to four external systems: the VM
//! inventory, the per-VM license metadata, the run-command channel that
//! executes a shell script inside a VM, and the secret store. Each one is an
//! object-safe async trait here so the orchestrator can hold them as
//! `Arc<dyn ...>` and tests can swap in the in-memory fleet.
//!
//! [`AzCli`] implements all four by shelling out to the `az` CLI through
//! [`command_executor`].
//!
//! ## Example
//!
//! ```no_run
//! use azure_fleet::{AzCli, Inventory, LicenseMetadata};
//!
//! # async fn example() -> azure_fleet::Result<()> {
//! let az = AzCli::new();
//! az.ensure_authenticated().await?;
//! for vm in az.list("rg-sap-prod").await? {
//!     let license = az.license_type("rg-sap-prod", &vm.name).await?;
//!     println!("{} ({}): {}", vm.name, vm.image_marker, license);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod az;
#[cfg(feature = "test-utils")]
mod memory;
mod model;
mod traits;

pub use az::AzCli;
#[cfg(feature = "test-utils")]
pub use memory::{FailurePoint, InMemoryFleet};
pub use model::{RemoteOutput, RemoteScript, ScriptPurpose, VmRecord};
pub use traits::{Inventory, LicenseMetadata, RemoteExecutor, SecretStore};

/// Errors returned by fleet collaborators
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The CLI ran but reported failure
    #[error("{operation} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        /// Short name of the operation, e.g. `vm show`
        operation: String,
        /// CLI exit code
        code: Option<i32>,
        /// Trimmed stderr of the CLI
        stderr: String,
    },

    /// The requested resource does not exist
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// No usable login session for the cloud CLI
    #[error("not authenticated to Azure: {0}")]
    NotAuthenticated(String),

    /// The CLI printed something we could not interpret
    #[error("failed to parse {operation} output: {reason}")]
    Parse {
        /// Short name of the operation
        operation: String,
        /// What went wrong
        reason: String,
    },

    /// Spawning the CLI failed
    #[error("command execution error: {0}")]
    Executor(#[from] command_executor::Error),

    /// Anything else, carried as text
    #[error("{0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
