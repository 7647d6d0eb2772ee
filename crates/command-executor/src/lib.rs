//! Runtime-agnostic command execution library
//!
//! This crate provides a small, uniform interface for spawning local processes,
//! streaming their output, and collecting exit results. Cloud CLI calls made by
//! the conversion tooling all go through it.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod event;
pub mod executor;
pub mod launcher;
pub mod process;

pub use command::{Command, REDACTED};
pub use error::{Error, Result};
pub use event::{ProcessEvent, ProcessEventType};
pub use executor::Executor;
pub use launcher::Launcher;
pub use process::{ExitResult, ExitStatus, ProcessHandle};
