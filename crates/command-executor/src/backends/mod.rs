//! Backend implementations for different execution contexts

pub mod local;
pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
