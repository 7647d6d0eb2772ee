//! Command-line arguments

use byos_orchestrator::{DEFAULT_LOG_ROOT, RunOptions};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Arguments of `payg-to-byos`
#[derive(Parser, Debug, Clone)]
#[command(name = "payg-to-byos")]
#[command(about = "Convert Azure SLES VMs from pay-as-you-go to BYOS licensing")]
#[command(version)]
pub struct ConvertArgs {
    /// Resource group containing the VMs
    #[arg(short = 'g', long = "resource-group")]
    pub group: String,

    /// Registration server hostname
    #[arg(short = 's', long = "server", required_unless_present = "skip_registration")]
    pub server: Option<String>,

    /// Convert only this VM instead of every SLES VM in the group
    #[arg(short = 'n', long = "name")]
    pub vm: Option<String>,

    /// Number of VMs converted in parallel
    #[arg(short = 'p', long = "parallel", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub parallel: u32,

    /// Test mode: register and leave a marker repository for validation
    #[arg(short = 't', long = "test")]
    pub test_mode: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Clean up repositories without registering
    #[arg(long)]
    pub skip_registration: bool,

    /// Key vault holding the activation key
    #[arg(long = "keyvault", requires = "secret_name")]
    pub key_vault: Option<String>,

    /// Name of the activation key secret in the key vault
    #[arg(long = "secret-name", requires = "key_vault")]
    pub secret_name: Option<String>,

    /// Directory that receives one log directory per run
    #[arg(long, default_value = DEFAULT_LOG_ROOT)]
    pub log_root: PathBuf,

    /// Seconds to pause between VMs when converting one at a time
    #[arg(long, default_value_t = 5)]
    pub delay: u64,

    /// Show collaborator commands
    #[arg(short, long)]
    pub verbose: bool,
}

impl ConvertArgs {
    /// Turn the arguments into run options
    pub fn into_options(self, env_secret: Option<String>) -> RunOptions {
        let mut options = RunOptions::new(self.group)
            .with_concurrency(self.parallel as usize)
            .with_test_mode(self.test_mode)
            .with_skip_registration(self.skip_registration)
            .with_env_secret(env_secret)
            .with_log_root(self.log_root)
            .with_inter_target_delay(Duration::from_secs(self.delay));
        options.vm = self.vm;
        options.server = self.server;
        options.key_vault = self.key_vault;
        options.secret_name = self.secret_name;
        options.auto_confirm = self.yes;
        options
    }
}

/// Arguments of `byos-backup-cleanup`
#[derive(Parser, Debug, Clone)]
#[command(name = "byos-backup-cleanup")]
#[command(about = "Remove the repository backups left by payg-to-byos")]
#[command(version)]
pub struct CleanupArgs {
    /// Resource group containing the VMs
    #[arg(short = 'g', long = "resource-group")]
    pub group: String,

    /// Clean only this VM instead of every SLES VM in the group
    #[arg(short = 'n', long = "name")]
    pub vm: Option<String>,

    /// Number of VMs cleaned in parallel
    #[arg(short = 'p', long = "parallel", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub parallel: u32,

    /// Do not ask for confirmation
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Directory that receives one log directory per run
    #[arg(long, default_value = DEFAULT_LOG_ROOT)]
    pub log_root: PathBuf,

    /// Show collaborator commands
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use byos_orchestrator::RunMode;
    use clap::error::ErrorKind;

    #[test]
    fn test_minimal_conversion_args() {
        let args = ConvertArgs::try_parse_from(["payg-to-byos", "-g", "rg", "-s", "suma.example.com"])
            .unwrap();
        assert_eq!(args.parallel, 1);
        assert_eq!(args.delay, 5);
        assert_eq!(args.log_root, PathBuf::from(DEFAULT_LOG_ROOT));

        let options = args.into_options(None);
        assert_eq!(options.mode(), RunMode::Production);
        assert_eq!(options.server.as_deref(), Some("suma.example.com"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_server_required_unless_skipping() {
        let err = ConvertArgs::try_parse_from(["payg-to-byos", "-g", "rg"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let args =
            ConvertArgs::try_parse_from(["payg-to-byos", "-g", "rg", "--skip-registration"]).unwrap();
        assert_eq!(args.into_options(None).mode(), RunMode::SkipRegistration);
    }

    #[test]
    fn test_parallel_must_be_positive() {
        let err = ConvertArgs::try_parse_from(["payg-to-byos", "-g", "rg", "-s", "h", "-p", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_keyvault_needs_secret_name() {
        let err = ConvertArgs::try_parse_from([
            "payg-to-byos",
            "-g",
            "rg",
            "-s",
            "h",
            "--keyvault",
            "kv",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_full_conversion_args() {
        let args = ConvertArgs::try_parse_from([
            "payg-to-byos",
            "-g",
            "rg",
            "-s",
            "suma.example.com",
            "-n",
            "vm1",
            "-p",
            "4",
            "-t",
            "-y",
            "--keyvault",
            "kv",
            "--secret-name",
            "key",
            "--delay",
            "0",
        ])
        .unwrap();
        let options = args.into_options(Some("env".into()));

        assert_eq!(options.vm.as_deref(), Some("vm1"));
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.mode(), RunMode::Test);
        assert!(options.auto_confirm);
        assert_eq!(options.key_vault.as_deref(), Some("kv"));
        assert_eq!(options.secret_name.as_deref(), Some("key"));
        assert_eq!(options.env_secret.as_deref(), Some("env"));
        assert!(options.inter_target_delay.is_zero());
    }

    #[test]
    fn test_cleanup_args() {
        let args =
            CleanupArgs::try_parse_from(["byos-backup-cleanup", "-g", "rg", "-p", "3", "-y"]).unwrap();
        assert_eq!(args.group, "rg");
        assert_eq!(args.parallel, 3);
        assert!(args.yes);
        assert!(args.vm.is_none());
    }
}
