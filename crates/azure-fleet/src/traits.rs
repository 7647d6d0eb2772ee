//! Collaborator contracts consumed by the conversion orchestrator

use crate::{RemoteOutput, RemoteScript, Result, VmRecord};
use async_trait::async_trait;

/// VM inventory queries
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Verify the caller holds a usable session before any real work
    async fn ensure_authenticated(&self) -> Result<()> {
        Ok(())
    }

    /// List every VM in a resource group, in provider order
    async fn list(&self, group: &str) -> Result<Vec<VmRecord>>;

    /// Look up one VM; `Ok(None)` when it does not exist
    async fn get(&self, group: &str, name: &str) -> Result<Option<VmRecord>>;
}

/// License type attribute of a VM
#[async_trait]
pub trait LicenseMetadata: Send + Sync {
    /// Current license type; empty when none is set (pay-as-you-go)
    async fn license_type(&self, group: &str, name: &str) -> Result<String>;

    /// Set the license type
    async fn set_license_type(&self, group: &str, name: &str, value: &str) -> Result<()>;
}

/// Runs a script inside a VM and waits for it to finish
///
/// Calls are synchronous from the caller's point of view and may take minutes.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Dispatch `script` to the VM and return its combined output
    async fn invoke(&self, group: &str, name: &str, script: &RemoteScript) -> Result<RemoteOutput>;
}

/// Secret store lookups
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the current value of `name` from `store`
    async fn get_secret(&self, store: &str, name: &str) -> Result<String>;
}
