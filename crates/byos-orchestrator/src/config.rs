//! Run configuration
//!
//! [`RunOptions`] is what the operator asked for. It is validated before any
//! collaborator is called. Once the targets and the activation key are known
//! it is frozen into a [`RunContext`] that every worker shares read-only.

use crate::credentials::ActivationSecret;
use crate::log_sink::run_log_dir;
use crate::validation::{validate_group, validate_server_hostname, validate_vm_name};
use crate::{Error, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default root for run log directories
pub const DEFAULT_LOG_ROOT: &str = "./byos-logs";

/// Default pause between targets in sequential mode
pub const DEFAULT_INTER_TARGET_DELAY: Duration = Duration::from_secs(5);

/// Which remote command variant a run dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Register against the management server with the activation key
    Production,
    /// Register, and additionally leave a marker repository behind
    Test,
    /// Clean up only; no registration at all
    SkipRegistration,
}

impl RunMode {
    /// Select the mode from CLI flags; skipping registration wins
    pub fn from_flags(test_mode: bool, skip_registration: bool) -> Self {
        match (test_mode, skip_registration) {
            (_, true) => RunMode::SkipRegistration,
            (true, false) => RunMode::Test,
            (false, false) => RunMode::Production,
        }
    }

    /// Whether the command unit registers the VM
    pub fn registers(&self) -> bool {
        !matches!(self, RunMode::SkipRegistration)
    }

    /// Whether the run may proceed without an activation key
    pub fn allows_missing_secret(&self) -> bool {
        matches!(self, RunMode::Test | RunMode::SkipRegistration)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Production => write!(f, "production"),
            RunMode::Test => write!(f, "test"),
            RunMode::SkipRegistration => write!(f, "skip-registration"),
        }
    }
}

/// Which VMs a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every VM of the image family in a resource group
    Group {
        /// Resource group
        group: String,
    },
    /// One named VM
    Single {
        /// Resource group
        group: String,
        /// VM name
        vm: String,
    },
}

impl Scope {
    /// Resource group of the scope
    pub fn group(&self) -> &str {
        match self {
            Scope::Group { group } | Scope::Single { group, .. } => group,
        }
    }

    /// The named VM, for single-target scopes
    pub fn vm(&self) -> Option<&str> {
        match self {
            Scope::Group { .. } => None,
            Scope::Single { vm, .. } => Some(vm),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Group { group } => write!(f, "resource group '{}'", group),
            Scope::Single { group, vm } => write!(f, "VM '{}' in resource group '{}'", vm, group),
        }
    }
}

/// Domain constants for one OS family on one cloud
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionProfile {
    /// Case-insensitive substring of the image marker that selects targets
    pub family: String,
    /// License type value of a converted VM
    pub target_license: String,
    /// Live repository definition directory
    pub repo_dir: String,
    /// Where repository definitions are backed up before the wipe
    pub backup_dir: String,
    /// Legacy registration agent units to stop and disable
    pub legacy_units: Vec<String>,
    /// Legacy registration files and caches to delete; may contain globs
    pub legacy_paths: Vec<String>,
    /// Path of the bootstrap script on the registration server
    pub bootstrap_path: String,
    /// Repository written in test mode so validation can recognise it
    pub test_marker_repo: String,
    /// How often a long dispatch reports that it is still waiting
    pub heartbeat_interval: Duration,
}

impl Default for ConversionProfile {
    fn default() -> Self {
        Self {
            family: "sles".to_string(),
            target_license: "SLES_BYOS".to_string(),
            repo_dir: "/etc/zypp/repos.d".to_string(),
            backup_dir: "/etc/zypp/repos.d.byos-backup".to_string(),
            legacy_units: vec![
                "guestregister.service".to_string(),
                "regionsrv-enabler-azure.service".to_string(),
                "regionsrv-enabler-azure.timer".to_string(),
            ],
            legacy_paths: vec![
                "/etc/SUSEConnect".to_string(),
                "/etc/zypp/credentials.d/SCCcredentials".to_string(),
                "/var/cache/cloudregister".to_string(),
                "/etc/zypp/services.d/*.service".to_string(),
            ],
            bootstrap_path: "/pub/bootstrap/bootstrap.sh".to_string(),
            test_marker_repo: "byos-test-marker".to_string(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Operator input for one conversion run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Resource group
    pub group: String,
    /// Single VM to convert instead of the whole group
    pub vm: Option<String>,
    /// Registration server hostname
    pub server: Option<String>,
    /// Maximum number of targets processed at once
    pub concurrency: usize,
    /// Test mode
    pub test_mode: bool,
    /// Clean up without registering
    pub skip_registration: bool,
    /// Do not ask for confirmation
    pub auto_confirm: bool,
    /// Key vault holding the activation key
    pub key_vault: Option<String>,
    /// Secret name inside the key vault
    pub secret_name: Option<String>,
    /// Activation key taken from the environment
    pub env_secret: Option<String>,
    /// Root directory for run logs
    pub log_root: PathBuf,
    /// Pause between targets in sequential mode
    pub inter_target_delay: Duration,
    /// Domain constants
    pub profile: ConversionProfile,
}

impl RunOptions {
    /// Options for a whole resource group with defaults for everything else
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            vm: None,
            server: None,
            concurrency: 1,
            test_mode: false,
            skip_registration: false,
            auto_confirm: false,
            key_vault: None,
            secret_name: None,
            env_secret: None,
            log_root: PathBuf::from(DEFAULT_LOG_ROOT),
            inter_target_delay: DEFAULT_INTER_TARGET_DELAY,
            profile: ConversionProfile::default(),
        }
    }

    /// Restrict the run to one VM
    pub fn with_vm(mut self, vm: impl Into<String>) -> Self {
        self.vm = Some(vm.into());
        self
    }

    /// Set the registration server
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the concurrency limit
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enable test mode
    pub fn with_test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    /// Skip registration
    pub fn with_skip_registration(mut self, enabled: bool) -> Self {
        self.skip_registration = enabled;
        self
    }

    /// Read the activation key from a key vault
    pub fn with_key_vault(mut self, store: impl Into<String>, secret: impl Into<String>) -> Self {
        self.key_vault = Some(store.into());
        self.secret_name = Some(secret.into());
        self
    }

    /// Activation key from the environment
    pub fn with_env_secret(mut self, value: Option<String>) -> Self {
        self.env_secret = value;
        self
    }

    /// Set the log root
    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Set the sequential inter-target delay
    pub fn with_inter_target_delay(mut self, delay: Duration) -> Self {
        self.inter_target_delay = delay;
        self
    }

    /// Replace the domain constants
    pub fn with_profile(mut self, profile: ConversionProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Mode selected by the flags
    pub fn mode(&self) -> RunMode {
        RunMode::from_flags(self.test_mode, self.skip_registration)
    }

    /// Scope selected by the flags
    pub fn scope(&self) -> Scope {
        match &self.vm {
            Some(vm) => Scope::Single {
                group: self.group.clone(),
                vm: vm.clone(),
            },
            None => Scope::Group {
                group: self.group.clone(),
            },
        }
    }

    /// Check every argument without touching any collaborator
    pub fn validate(&self) -> Result<()> {
        validate_group(&self.group)?;
        if let Some(vm) = &self.vm {
            validate_vm_name(vm)?;
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidArgument(
                "concurrency must be at least 1".to_string(),
            ));
        }
        match (&self.server, self.mode()) {
            (Some(server), _) => validate_server_hostname(server)?,
            (None, RunMode::SkipRegistration) => {}
            (None, _) => {
                return Err(Error::InvalidArgument(
                    "a registration server is required unless registration is skipped".to_string(),
                ));
            }
        }
        if self.key_vault.is_some() != self.secret_name.is_some() {
            return Err(Error::InvalidArgument(
                "--keyvault and --secret-name must be given together".to_string(),
            ));
        }
        Ok(())
    }

    /// Freeze these options into the shared context of a run
    pub fn into_context(
        self,
        secret: Option<ActivationSecret>,
        started_at: DateTime<Local>,
    ) -> RunContext {
        let log_dir = run_log_dir(&self.log_root, &self.group, started_at, None);
        RunContext::builder(self.scope(), self.mode())
            .concurrency(self.concurrency)
            .server(self.server)
            .secret(secret)
            .started_at(started_at)
            .log_dir(log_dir)
            .inter_target_delay(self.inter_target_delay)
            .profile(self.profile)
            .build()
    }
}

/// Immutable state of one run, shared by every worker
#[derive(Debug, Clone)]
pub struct RunContext {
    scope: Scope,
    mode: RunMode,
    concurrency: usize,
    server: Option<String>,
    secret: Option<ActivationSecret>,
    started_at: DateTime<Local>,
    log_dir: PathBuf,
    inter_target_delay: Duration,
    profile: ConversionProfile,
}

impl RunContext {
    /// Start building a context
    pub fn builder(scope: Scope, mode: RunMode) -> RunContextBuilder {
        RunContextBuilder {
            context: RunContext {
                scope,
                mode,
                concurrency: 1,
                server: None,
                secret: None,
                started_at: Local::now(),
                log_dir: PathBuf::from(DEFAULT_LOG_ROOT),
                inter_target_delay: DEFAULT_INTER_TARGET_DELAY,
                profile: ConversionProfile::default(),
            },
        }
    }

    /// Scope of the run
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Resource group of the run
    pub fn group(&self) -> &str {
        self.scope.group()
    }

    /// Run mode
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Concurrency limit, at least 1
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Registration server hostname
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Resolved activation key, if any
    pub fn secret(&self) -> Option<&ActivationSecret> {
        self.secret.as_ref()
    }

    /// When the run started
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Run log directory
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Pause between targets in sequential mode
    pub fn inter_target_delay(&self) -> Duration {
        self.inter_target_delay
    }

    /// Domain constants
    pub fn profile(&self) -> &ConversionProfile {
        &self.profile
    }
}

/// Builder for [`RunContext`]
#[derive(Debug)]
pub struct RunContextBuilder {
    context: RunContext,
}

impl RunContextBuilder {
    /// Concurrency limit; values below 1 are raised to 1
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.context.concurrency = concurrency.max(1);
        self
    }

    /// Registration server hostname
    pub fn server(mut self, server: Option<String>) -> Self {
        self.context.server = server;
        self
    }

    /// Resolved activation key
    pub fn secret(mut self, secret: Option<ActivationSecret>) -> Self {
        self.context.secret = secret;
        self
    }

    /// Start timestamp
    pub fn started_at(mut self, started_at: DateTime<Local>) -> Self {
        self.context.started_at = started_at;
        self
    }

    /// Run log directory
    pub fn log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.context.log_dir = log_dir.into();
        self
    }

    /// Sequential inter-target delay
    pub fn inter_target_delay(mut self, delay: Duration) -> Self {
        self.context.inter_target_delay = delay;
        self
    }

    /// Domain constants
    pub fn profile(mut self, profile: ConversionProfile) -> Self {
        self.context.profile = profile;
        self
    }

    /// Finish building
    pub fn build(self) -> RunContext {
        self.context
    }
}
