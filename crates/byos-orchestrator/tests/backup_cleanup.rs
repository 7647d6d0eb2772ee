//! Backup removal job

mod common;

use azure_fleet::{InMemoryFleet, ScriptPurpose};
use byos_orchestrator::{
    BackupCleanup, CleanupOutcome, ConversionProfile, RunLog, Target, MAIN_LOG,
};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

fn target(name: &str) -> Target {
    Target {
        name: name.to_string(),
        image_marker: SLES.to_string(),
    }
}

#[smol_potat::test]
async fn test_cleanup_dispatches_once_per_target() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, BYOS)
            .with_vm("b", SLES, BYOS),
    );
    let log = RunLog::create(root.path().join("cleanup")).unwrap();
    let job = BackupCleanup::new(
        GROUP,
        2,
        &ConversionProfile::default(),
        collaborators(&fleet),
    );

    let report = job.run(vec![target("a"), target("b")], &log).await;
    report.write_to(&log);

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.failed(), 0);
    for vm in ["a", "b"] {
        let scripts = fleet.scripts_for(vm, ScriptPurpose::BackupCleanup);
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].body.contains("/etc/zypp/repos.d.byos-backup"));
        assert_eq!(fleet.dispatches_for(vm, ScriptPurpose::Conversion), 0);
    }
    assert_eq!(
        report.outcomes[0].1,
        CleanupOutcome::Completed {
            detail: "backup removed on a".to_string()
        }
    );

    let main = read_lines(&log.dir().join(MAIN_LOG)).join("\n");
    assert!(main.contains("Cleaned: 2  Failed: 0  Total: 2"));
}

#[smol_potat::test]
async fn test_cleanup_failure_sets_exit_code() {
    let root = TempDir::new().unwrap();
    // "gone" is not in the fleet, so its dispatch fails.
    let fleet = Arc::new(InMemoryFleet::new().with_vm("a", SLES, BYOS));
    let log = RunLog::create(root.path().join("cleanup")).unwrap();
    let job = BackupCleanup::new(GROUP, 1, &ConversionProfile::default(), collaborators(&fleet));

    let report = job.run(vec![target("a"), target("gone")], &log).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.outcomes[1].1, CleanupOutcome::Failed { .. }));
    let rendered = report.table(false).to_string();
    assert!(rendered.contains("gone"));
    assert!(rendered.contains("failed"));
}
