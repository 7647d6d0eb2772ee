//! Common test utilities
#![allow(dead_code)]

use azure_fleet::InMemoryFleet;
use byos_orchestrator::{Collaborators, RunOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const GROUP: &str = "rg-sap";
pub const SERVER: &str = "suma.example.com";
pub const SLES: &str = "sles-sap-15-sp5:gen2";
pub const BYOS: &str = "SLES_BYOS";

/// Production options with logs under `root` and no pause between targets
pub fn options(root: &Path) -> RunOptions {
    RunOptions::new(GROUP)
        .with_server(SERVER)
        .with_env_secret(Some("1-env-activation-key".to_string()))
        .with_log_root(root)
        .with_inter_target_delay(Duration::ZERO)
}

pub fn collaborators(fleet: &Arc<InMemoryFleet>) -> Collaborators {
    Collaborators::from_fleet(Arc::clone(fleet))
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

/// Lines of `main.log` tagged with `vm`
pub fn tagged_lines(main_log: &Path, vm: &str) -> Vec<String> {
    let tag = format!("] [{}] ", vm);
    read_lines(main_log)
        .into_iter()
        .filter(|l| l.contains(&tag))
        .collect()
}

/// Every log file of a run, concatenated
pub fn all_logs(dir: &Path) -> String {
    let mut out = String::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        out.push_str(&std::fs::read_to_string(entry.unwrap().path()).unwrap());
    }
    out
}
