//! Data exchanged with fleet collaborators

use serde::{Deserialize, Serialize};

/// One VM as reported by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    /// VM name, unique within its resource group
    pub name: String,
    /// Image offer and sku joined by `:`, used for family filtering
    pub image_marker: String,
}

impl VmRecord {
    /// Create a record
    pub fn new(name: impl Into<String>, image_marker: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_marker: image_marker.into(),
        }
    }
}

/// What a remote script is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScriptPurpose {
    /// Repository cleanup and re-registration
    Conversion,
    /// Read-only repository listing
    Probe,
    /// Removal of the repository backup directory
    BackupCleanup,
}

/// A shell script to run inside a VM as one unit
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteScript {
    /// Purpose, used for logging and by test doubles
    pub purpose: ScriptPurpose,
    /// Full script body
    pub body: String,
    /// Whether the body embeds a credential and must not be logged
    pub sensitive: bool,
}

impl RemoteScript {
    /// Create a script whose body may be logged
    pub fn new(purpose: ScriptPurpose, body: impl Into<String>) -> Self {
        Self {
            purpose,
            body: body.into(),
            sensitive: false,
        }
    }

    /// Mark the body as carrying a secret
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

impl std::fmt::Debug for RemoteScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("RemoteScript");
        s.field("purpose", &self.purpose);
        if self.sensitive {
            s.field("body", &command_executor::REDACTED);
        } else {
            s.field("body", &self.body);
        }
        s.field("sensitive", &self.sensitive).finish()
    }
}

/// Result of a run-command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    /// 0 when the provider reported success
    pub exit_status: i32,
    /// Everything the script printed, stdout and stderr combined
    pub output: String,
}

impl RemoteOutput {
    /// Returns true if the provider reported success
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}
