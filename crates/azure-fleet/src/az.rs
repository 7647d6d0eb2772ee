//! `az` CLI implementation of the fleet collaborators

use crate::{
    Error, Inventory, LicenseMetadata, RemoteExecutor, RemoteOutput, RemoteScript, Result,
    SecretStore, VmRecord,
};
use async_trait::async_trait;
use command_executor::{Command, ExitResult, Executor, backends::LocalLauncher};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

const IMAGE_QUERY: &str = "{name:name, offer:storageProfile.imageReference.offer, sku:storageProfile.imageReference.sku}";

/// Fleet collaborators backed by the Azure CLI
#[derive(Debug, Clone)]
pub struct AzCli {
    binary: PathBuf,
    executor: Executor<LocalLauncher>,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    name: String,
    offer: Option<String>,
    sku: Option<String>,
}

impl From<ImageRow> for VmRecord {
    fn from(row: ImageRow) -> Self {
        let image_marker = [row.offer, row.sku]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(":");
        VmRecord::new(row.name, image_marker)
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandResponse {
    #[serde(default)]
    value: Vec<RunCommandStatus>,
}

#[derive(Debug, Deserialize)]
struct RunCommandStatus {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl AzCli {
    /// Use the `az` found on `PATH`
    pub fn new() -> Self {
        Self::with_binary("az")
    }

    /// Use a specific CLI binary
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            executor: Executor::local("az"),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("AZURE_CORE_ONLY_SHOW_ERRORS", "true");
        cmd
    }

    /// Run a CLI command, mapping a non-zero exit to `CommandFailed`
    async fn run(&self, operation: &str, cmd: Command) -> Result<ExitResult> {
        let result = self.executor.execute(cmd).await?;
        if result.success() {
            Ok(result)
        } else {
            Err(Error::CommandFailed {
                operation: operation.to_string(),
                code: result.status.code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}

impl Default for AzCli {
    fn default() -> Self {
        Self::new()
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("ResourceNotFound") || stderr.contains("was not found")
}

fn parse_json<T: serde::de::DeserializeOwned>(operation: &str, stdout: &str) -> Result<T> {
    serde_json::from_str(stdout).map_err(|e| Error::Parse {
        operation: operation.to_string(),
        reason: e.to_string(),
    })
}

/// Normalise `-o tsv` output of an optional string attribute
fn tsv_value(stdout: &str) -> String {
    let value = stdout.trim();
    if value == "None" || value == "null" {
        String::new()
    } else {
        value.to_string()
    }
}

/// Turn a run-command JSON response into a single exit status and output
fn parse_run_command(stdout: &str) -> Result<RemoteOutput> {
    let response: RunCommandResponse = parse_json("vm run-command invoke", stdout)?;
    if response.value.is_empty() {
        return Err(Error::Parse {
            operation: "vm run-command invoke".to_string(),
            reason: "response has no status entries".to_string(),
        });
    }
    let succeeded = response
        .value
        .iter()
        .all(|s| s.code.to_ascii_lowercase().contains("succeeded"));
    let output = response
        .value
        .into_iter()
        .map(|s| s.message)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(RemoteOutput {
        exit_status: if succeeded { 0 } else { 1 },
        output,
    })
}

#[async_trait]
impl Inventory for AzCli {
    async fn ensure_authenticated(&self) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["account", "show", "-o", "none"]);
        match self.run("account show", cmd).await {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { stderr, .. }) => Err(Error::NotAuthenticated(stderr)),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, group: &str) -> Result<Vec<VmRecord>> {
        let mut cmd = self.command();
        cmd.args(["vm", "list", "-g", group, "--query"])
            .arg(format!("[].{}", IMAGE_QUERY))
            .args(["-o", "json"]);
        let result = self.run("vm list", cmd).await?;
        let rows: Vec<ImageRow> = parse_json("vm list", &result.stdout)?;
        debug!(group, count = rows.len(), "listed VMs");
        Ok(rows.into_iter().map(VmRecord::from).collect())
    }

    async fn get(&self, group: &str, name: &str) -> Result<Option<VmRecord>> {
        let mut cmd = self.command();
        cmd.args(["vm", "show", "-g", group, "-n", name, "--query", IMAGE_QUERY])
            .args(["-o", "json"]);
        match self.run("vm show", cmd).await {
            Ok(result) => {
                let row: ImageRow = parse_json("vm show", &result.stdout)?;
                Ok(Some(row.into()))
            }
            Err(Error::CommandFailed { stderr, .. }) if is_not_found(&stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LicenseMetadata for AzCli {
    async fn license_type(&self, group: &str, name: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(["vm", "show", "-g", group, "-n", name])
            .args(["--query", "licenseType", "-o", "tsv"]);
        match self.run("vm show", cmd).await {
            Ok(result) => Ok(tsv_value(&result.stdout)),
            Err(Error::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                Err(Error::ResourceNotFound(format!("{}/{}", group, name)))
            }
            Err(e) => Err(e),
        }
    }

    async fn set_license_type(&self, group: &str, name: &str, value: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["vm", "update", "-g", group, "-n", name])
            .args(["--license-type", value, "-o", "none"]);
        self.run("vm update", cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for AzCli {
    async fn invoke(&self, group: &str, name: &str, script: &RemoteScript) -> Result<RemoteOutput> {
        let mut cmd = self.command();
        cmd.args(["vm", "run-command", "invoke", "-g", group, "-n", name])
            .args(["--command-id", "RunShellScript", "--scripts"]);
        if script.sensitive {
            cmd.sensitive_arg(&script.body);
        } else {
            cmd.arg(&script.body);
        }
        cmd.args(["-o", "json"]);

        debug!(vm = name, purpose = ?script.purpose, "dispatching run-command");
        let result = self.run("vm run-command invoke", cmd).await?;
        parse_run_command(&result.stdout)
    }
}

#[async_trait]
impl SecretStore for AzCli {
    async fn get_secret(&self, store: &str, name: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(["keyvault", "secret", "show", "--vault-name", store, "--name", name])
            .args(["--query", "value", "-o", "tsv"]);
        let result = self.run("keyvault secret show", cmd).await?;
        // Only the trailing newline belongs to tsv framing.
        Ok(result.stdout.trim_end_matches(['\r', '\n']).to_string())
    }
}
