//! Error types for the conversion orchestrator

use std::path::PathBuf;

/// Errors that abort a run before or outside per-target processing
///
/// Per-target failures never surface here; they become
/// [`ConversionOutcome::Failed`](crate::ConversionOutcome::Failed).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A single named VM does not exist
    #[error("VM '{vm}' not found in resource group '{group}'")]
    TargetNotFound {
        /// Resource group searched
        group: String,
        /// Requested VM name
        vm: String,
    },

    /// Group scope matched nothing
    #[error("no VMs with an image matching '{family}' found in resource group '{group}'")]
    NoTargetsFound {
        /// Resource group searched
        group: String,
        /// Image family filter
        family: String,
    },

    /// Registration requested without any activation key source
    #[error(
        "no activation key available: pass --keyvault and --secret-name, set {env_var}, or use test mode or --skip-registration"
    )]
    MissingActivationKey {
        /// Environment variable consulted
        env_var: &'static str,
    },

    /// Explicitly requested secret store lookup failed
    #[error("failed to read secret '{name}' from key vault '{store}': {reason}")]
    SecretStore {
        /// Key vault name
        store: String,
        /// Secret name
        name: String,
        /// Collaborator error text
        reason: String,
    },

    /// Registration server failed validation
    #[error("invalid registration server '{value}': {reason}")]
    InvalidServerHostname {
        /// Value as given
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// Any other bad argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Fleet collaborator failure during pre-flight
    #[error("fleet provider error: {0}")]
    Provider(#[from] azure_fleet::Error),

    /// The run log could not be created or opened
    #[error("log sink error at {}: {source}", path.display())]
    LogSink {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn log_sink(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::LogSink {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
