//! Process management traits and types

use crate::error::Result;
use async_trait::async_trait;

/// A handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Wait for the process to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;
}

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, `None` when a signal ended the process
    pub code: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Exit status plus everything the process printed
#[derive(Debug, Clone)]
pub struct ExitResult {
    /// How the process ended
    pub status: ExitStatus,
    /// Captured stdout, one line per event, newline-terminated
    pub stdout: String,
    /// Captured stderr, one line per event, newline-terminated
    pub stderr: String,
}

impl ExitResult {
    /// Returns true if the process exited successfully
    pub fn success(&self) -> bool {
        self.status.success()
    }
}
