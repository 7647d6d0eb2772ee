//! Command-line front ends for the BYOS conversion orchestrator
//!
//! Two binaries share this library: `payg-to-byos` converts VMs and
//! `byos-backup-cleanup` removes the repository backups the conversion left
//! behind once the operator is satisfied with the result.

#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod console;
