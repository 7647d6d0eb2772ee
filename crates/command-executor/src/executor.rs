//! Named executor wrapping a launcher

use crate::command::Command;
use crate::error::Result;
use crate::launcher::Launcher;
use crate::process::ExitResult;
use std::time::Instant;
use tracing::debug;

/// An executor that runs commands through a specific launcher
///
/// The name identifies the caller in debug logs; the command line is always
/// logged through its redacting `Display` form.
#[derive(Debug, Clone)]
pub struct Executor<L: Launcher> {
    name: String,
    launcher: L,
}

impl<L: Launcher> Executor<L> {
    /// Create a new executor with the given launcher
    pub fn new(name: impl Into<String>, launcher: L) -> Self {
        Self {
            name: name.into(),
            launcher,
        }
    }

    /// Execute a command and wait for it to complete
    pub async fn execute(&self, command: Command) -> Result<ExitResult> {
        let started = Instant::now();
        debug!(executor = %self.name, "running: {}", command);
        let result = self.launcher.execute(command).await?;
        debug!(
            executor = %self.name,
            code = ?result.status.code,
            "finished in {:?}",
            started.elapsed()
        );
        Ok(result)
    }
}

impl Executor<crate::backends::LocalLauncher> {
    /// Executor that spawns processes on this machine
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, crate::backends::LocalLauncher)
    }
}
