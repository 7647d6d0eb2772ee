//! External collaborators of a run

use azure_fleet::{Inventory, LicenseMetadata, RemoteExecutor, SecretStore};
use std::sync::Arc;

/// The four fleet collaborators a run talks to
#[derive(Clone)]
pub struct Collaborators {
    /// VM inventory
    pub inventory: Arc<dyn Inventory>,
    /// License type metadata
    pub metadata: Arc<dyn LicenseMetadata>,
    /// Run-command channel
    pub executor: Arc<dyn RemoteExecutor>,
    /// Secret store
    pub secrets: Arc<dyn SecretStore>,
}

impl Collaborators {
    /// Use one backend for every collaborator
    pub fn from_fleet<F>(fleet: Arc<F>) -> Self
    where
        F: Inventory + LicenseMetadata + RemoteExecutor + SecretStore + 'static,
    {
        Self {
            inventory: fleet.clone(),
            metadata: fleet.clone(),
            executor: fleet.clone(),
            secrets: fleet,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
