//! Remote command units
//!
//! Everything that runs inside a target VM is built here as plain data. The
//! builders are pure so each variant can be checked without a fleet.

use crate::config::{ConversionProfile, RunMode};
use crate::credentials::ActivationSecret;
use azure_fleet::{RemoteScript, ScriptPurpose};

/// Where the bootstrap script is downloaded to on the target
const BOOTSTRAP_TMP: &str = "/tmp/byos-bootstrap.sh";

/// Repository listing used by validation
const LIST_REPOS: &str = "zypper --non-interactive --no-refresh lr -u 2>&1 || true";

/// The cleanup and registration script dispatched once per target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandUnit {
    script: RemoteScript,
    registers: bool,
    steps: Vec<String>,
}

impl CommandUnit {
    /// Script handed to the remote executor
    pub fn script(&self) -> &RemoteScript {
        &self.script
    }

    /// Full script body
    pub fn body(&self) -> &str {
        &self.script.body
    }

    /// Whether the unit contains the registration sub-step
    pub fn registers(&self) -> bool {
        self.registers
    }

    /// Whether the body embeds the activation key
    pub fn is_sensitive(&self) -> bool {
        self.script.sensitive
    }

    /// Titles of the steps, in execution order
    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

/// Quote a value for a POSIX shell
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a path unless it is a glob the shell must expand
fn sh_path(path: &str) -> String {
    if path.contains(['*', '?']) {
        path.to_string()
    } else {
        sh_quote(path)
    }
}

fn stop_legacy_agent(profile: &ConversionProfile) -> String {
    let units: Vec<String> = profile.legacy_units.iter().map(|u| sh_quote(u)).collect();
    format!(
        r#"for unit in {units}; do
    if systemctl cat "$unit" >/dev/null 2>&1; then
        systemctl stop "$unit" >/dev/null 2>&1 || true
        systemctl disable "$unit" >/dev/null 2>&1 || true
        echo "Stopped and disabled $unit"
    fi
done"#,
        units = units.join(" ")
    )
}

fn backup_and_wipe_repos(profile: &ConversionProfile) -> String {
    let repos = sh_quote(&profile.repo_dir);
    let backup = sh_quote(&profile.backup_dir);
    format!(
        r#"mkdir -p {backup}
if ls {repos}/*.repo >/dev/null 2>&1; then
    if cp -a {repos}/*.repo {backup}/; then
        rm -f {repos}/*.repo
        echo "Repository definitions moved to {backup_dir}"
    else
        echo "Backup to {backup_dir} failed, repository definitions left in place"
    fi
else
    echo "No repository definitions to back up"
fi"#,
        backup_dir = profile.backup_dir,
    )
}

fn remove_legacy_files(profile: &ConversionProfile) -> String {
    let paths: Vec<String> = profile.legacy_paths.iter().map(|p| sh_path(p)).collect();
    format!(
        "rm -rf {}\necho \"Legacy registration files removed\"",
        paths.join(" ")
    )
}

fn register(profile: &ConversionProfile, server: &str, secret: Option<&ActivationSecret>) -> String {
    let url = format!("https://{}{}", server, profile.bootstrap_path);
    let key = match secret {
        Some(secret) => format!("    export ACTIVATION_KEYS={}", sh_quote(secret.expose())),
        None => "    echo \"No activation key configured, registering without one\"".to_string(),
    };
    format!(
        r#"BYOS_REGISTERED=0
if curl -fsS -o {tmp} {url}; then
{key}
    bash {tmp}
    status=$?
    echo "Bootstrap exited with status $status"
    [ "$status" -eq 0 ] && BYOS_REGISTERED=1
    rm -f {tmp}
else
    echo "Failed to download bootstrap script from {server}"
fi"#,
        tmp = BOOTSTRAP_TMP,
        url = sh_quote(&url),
    )
}

fn marker_path(profile: &ConversionProfile) -> String {
    format!("{}/{}.repo", profile.repo_dir, profile.test_marker_repo)
}

/// Only written once the bootstrap script exited 0
fn write_test_marker(profile: &ConversionProfile, server: &str) -> String {
    let name = &profile.test_marker_repo;
    let path = sh_quote(&marker_path(profile));
    format!(
        r#"if [ "${{BYOS_REGISTERED:-0}}" = 1 ]; then
    cat > {path} <<'REPO'
[{name}]
name={name}
enabled=0
autorefresh=0
baseurl=https://{server}/pub/
REPO
    echo "Test marker repository {name} written"
else
    echo "Registration did not complete, no test marker written"
fi"#
    )
}

fn probe() -> String {
    format!(
        "{}\nif command -v SUSEConnect >/dev/null 2>&1; then\n    SUSEConnect --status-text 2>&1 || true\nfi",
        LIST_REPOS
    )
}

/// Build the cleanup and registration unit for a run
///
/// Every mode stops the legacy agent, backs up and wipes the repository
/// definitions, removes legacy registration files and ends with a read-only
/// probe. Production and test mode register with `server` in between; test
/// mode also writes a disabled marker repository. Registration is omitted
/// when the mode skips it or no server is known.
pub fn build_command_unit(
    mode: RunMode,
    profile: &ConversionProfile,
    secret: Option<&ActivationSecret>,
    server: Option<&str>,
) -> CommandUnit {
    let mut steps: Vec<(String, String)> = vec![
        (
            "Stopping legacy registration agent".to_string(),
            stop_legacy_agent(profile),
        ),
        (
            format!("Backing up repositories to {}", profile.backup_dir),
            backup_and_wipe_repos(profile),
        ),
        (
            "Removing legacy registration files".to_string(),
            remove_legacy_files(profile),
        ),
    ];

    let registration = match server {
        Some(server) if mode.registers() => Some(server),
        _ => None,
    };
    if let Some(server) = registration {
        steps.push((
            format!("Registering with {}", server),
            register(profile, server, secret),
        ));
    }
    if let (RunMode::Test, Some(server)) = (mode, registration) {
        steps.push((
            "Writing test marker repository".to_string(),
            write_test_marker(profile, server),
        ));
    }
    steps.push(("Validating repositories".to_string(), probe()));

    let total = steps.len();
    let mut body = format!("#!/bin/bash\nset -u\necho \"BYOS conversion ({} mode)\"\n", mode);
    for (i, (title, commands)) in steps.iter().enumerate() {
        body.push_str(&format!("echo \"==> [{}/{}] {}\"\n", i + 1, total, title));
        body.push_str(commands);
        body.push('\n');
    }

    let embeds_secret = registration.is_some() && secret.is_some();
    let mut script = RemoteScript::new(ScriptPurpose::Conversion, body);
    if embeds_secret {
        script = script.sensitive();
    }

    CommandUnit {
        script,
        registers: registration.is_some(),
        steps: steps.into_iter().map(|(title, _)| title).collect(),
    }
}

/// Read-only repository listing used by post-run validation
pub fn build_probe_unit() -> RemoteScript {
    RemoteScript::new(ScriptPurpose::Probe, LIST_REPOS)
}

/// Removal of the repository backup directory
pub fn build_backup_cleanup_unit(profile: &ConversionProfile) -> RemoteScript {
    let dir = sh_quote(&profile.backup_dir);
    let marker = sh_quote(&marker_path(profile));
    RemoteScript::new(
        ScriptPurpose::BackupCleanup,
        format!(
            "rm -f {marker}\nif [ -d {dir} ]; then\n    rm -rf {dir} && echo \"Removed {path}\"\nelse\n    echo \"No backup directory at {path}\"\nfi",
            path = profile.backup_dir
        ),
    )
}

/// Parsed output of a repository listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoListing {
    /// Number of configured repositories
    pub count: usize,
    rows: Vec<String>,
    raw: String,
}

impl RepoListing {
    /// Parse `zypper lr` table output
    ///
    /// Repository rows start with their number followed by a `|` column
    /// separator; headers, separators and messages are ignored.
    pub fn parse(output: &str) -> Self {
        let rows: Vec<String> = output
            .lines()
            .filter(|line| {
                let line = line.trim_start();
                let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
                digits > 0 && line[digits..].trim_start().starts_with('|')
            })
            .map(|line| line.to_lowercase())
            .collect();
        Self {
            count: rows.len(),
            rows,
            raw: output.to_string(),
        }
    }

    /// Repository rows containing `needle` but not `except`, case-insensitive
    pub fn rows_mentioning(&self, needle: &str, except: &str) -> usize {
        let needle = needle.to_lowercase();
        let except = except.to_lowercase();
        self.rows
            .iter()
            .filter(|row| row.contains(&needle) && !row.contains(&except))
            .count()
    }

    /// Case-insensitive substring search over the whole listing
    pub fn mentions(&self, needle: &str) -> bool {
        self.raw.to_lowercase().contains(&needle.to_lowercase())
    }
}
