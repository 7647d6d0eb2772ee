//! End-to-end conversion runs against the in-memory fleet

mod common;

use azure_fleet::{FailurePoint, InMemoryFleet, ScriptPurpose};
use byos_orchestrator::{ConversionOutcome, ConversionRun, RunOptions, RunReport, Stage, MAIN_LOG};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn run(fleet: &Arc<InMemoryFleet>, options: RunOptions) -> RunReport {
    ConversionRun::new(options, collaborators(fleet))
        .preflight()
        .await
        .unwrap()
        .execute()
        .await
        .unwrap()
}

const TEST_MODE_LISTING: &str = "\
1 | byos-test-marker | byos-test-marker | No  | https://suma.example.com/pub/
2 | sles15-pool      | SLES15-SP5-Pool  | Yes | https://suma.example.com/rhn/manager/dist";

fn outcome<'a>(report: &'a RunReport, vm: &str) -> &'a ConversionOutcome {
    &report
        .outcomes
        .iter()
        .find(|(t, _)| t.name == vm)
        .unwrap()
        .1
}

#[smol_potat::test]
async fn test_mixed_group_reports_each_outcome() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("vm-done", SLES, BYOS)
            .with_vm("vm-ok", SLES, "")
            .with_vm("vm-bad", SLES, "")
            .failing_at("vm-bad", FailurePoint::Dispatch),
    );
    let report = run(&fleet, options(root.path())).await;

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.exit_code(), 1);

    assert_eq!(*outcome(&report, "vm-done"), ConversionOutcome::Skipped);
    assert_eq!(
        *outcome(&report, "vm-ok"),
        ConversionOutcome::Succeeded {
            license_verified: true
        }
    );
    match outcome(&report, "vm-bad") {
        ConversionOutcome::Failed { stage, cause } => {
            assert_eq!(*stage, Stage::CleanupRegister);
            assert!(cause.contains("simulated vm run-command invoke failure"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Nothing after the failed dispatch ran for vm-bad.
    assert_eq!(fleet.license_of("vm-bad").as_deref(), Some(""));
    assert_eq!(fleet.license_of("vm-ok").as_deref(), Some(BYOS));
    assert_eq!(fleet.dispatches_for("vm-done", ScriptPurpose::Conversion), 0);

    // Failed targets are not validated.
    assert_eq!(fleet.dispatches_for("vm-bad", ScriptPurpose::Probe), 0);
    assert_eq!(report.validation.len(), 2);

    let bad_log = read_lines(&report.log_dir.join("vm-bad.log")).join("\n");
    assert!(bad_log.contains("[ERROR] Cleanup and registration failed"));
}

#[smol_potat::test]
async fn test_outcomes_follow_resolver_order() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("b", SLES, BYOS)
            .with_vm("c", SLES, "")
            .with_vm("d", SLES, BYOS)
            .with_dispatch_delay(Duration::from_millis(20)),
    );
    let report = run(&fleet, options(root.path()).with_concurrency(4)).await;

    let names: Vec<_> = report.outcomes.iter().map(|(t, _)| t.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c", "d"]);
    let validated: Vec<_> = report.validation.iter().map(|r| r.vm.as_str()).collect();
    assert_eq!(validated, ["a", "b", "c", "d"]);
}

#[smol_potat::test]
async fn test_rerun_converges_without_new_dispatches() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("b", SLES, "")
            .with_vm("c", SLES, BYOS),
    );

    let first = run(&fleet, options(root.path()).with_concurrency(2)).await;
    assert_eq!(first.summary.succeeded, 2);
    assert_eq!(first.summary.skipped, 1);
    let dispatched: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|vm| fleet.dispatches_for(vm, ScriptPurpose::Conversion))
        .collect();
    assert_eq!(dispatched, [1, 1, 0]);

    let second = run(&fleet, options(root.path()).with_concurrency(2)).await;
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(second.summary.exit_code(), 0);
    for vm in ["a", "b", "c"] {
        let expected = if vm == "c" { 0 } else { 1 };
        assert_eq!(fleet.dispatches_for(vm, ScriptPurpose::Conversion), expected, "{vm}");
    }
    assert_ne!(first.log_dir, second.log_dir);
}

#[smol_potat::test]
async fn test_failed_target_is_retried_on_rerun() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("b", SLES, "")
            .failing_at("b", FailurePoint::LicenseUpdate),
    );
    let first = run(&fleet, options(root.path())).await;
    assert!(matches!(
        outcome(&first, "b"),
        ConversionOutcome::Failed {
            stage: Stage::LicenseUpdate,
            ..
        }
    ));

    let second = run(&fleet, options(root.path())).await;
    assert_eq!(*outcome(&second, "a"), ConversionOutcome::Skipped);
    assert!(outcome(&second, "b").is_failed());
    assert_eq!(fleet.dispatches_for("a", ScriptPurpose::Conversion), 1);
    assert_eq!(fleet.dispatches_for("b", ScriptPurpose::Conversion), 2);
}

#[smol_potat::test]
async fn test_concurrency_limit_is_respected() {
    let root = TempDir::new().unwrap();
    let mut fleet = InMemoryFleet::new().with_dispatch_delay(Duration::from_millis(30));
    for i in 0..8 {
        fleet = fleet.with_vm(&format!("vm{}", i), SLES, "");
    }
    let fleet = Arc::new(fleet);

    let report = run(&fleet, options(root.path()).with_concurrency(3)).await;

    assert_eq!(report.summary.succeeded, 8);
    assert!(report.peak_concurrency <= 3);
    assert!(report.peak_concurrency >= 2);
    assert!(fleet.peak_concurrent_dispatches() <= 3);
}

#[smol_potat::test]
async fn test_sequential_run_never_overlaps() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("b", SLES, "")
            .with_dispatch_delay(Duration::from_millis(10)),
    );
    let opts = options(root.path()).with_inter_target_delay(Duration::from_millis(10));
    let report = run(&fleet, opts).await;

    assert_eq!(report.peak_concurrency, 1);
    assert_eq!(fleet.peak_concurrent_dispatches(), 1);
}

#[smol_potat::test]
async fn test_target_lines_match_between_logs() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("b", SLES, BYOS)
            .with_vm("c", SLES, "")
            .with_vm("d", SLES, "")
            .failing_at("c", FailurePoint::Dispatch)
            .with_probe_output("a", "1 | suma | suma | Yes | https://suma.example.com/rhn\nsecond line")
            .with_dispatch_delay(Duration::from_millis(5)),
    );
    let report = run(&fleet, options(root.path()).with_concurrency(4)).await;

    let main_log = report.log_dir.join(MAIN_LOG);
    for vm in ["a", "b", "c", "d"] {
        let own = read_lines(&report.log_dir.join(format!("{}.log", vm)));
        let tagged = tagged_lines(&main_log, vm);
        assert!(!own.is_empty(), "{vm}");
        assert_eq!(own.len(), tagged.len(), "{vm}");
        // Same messages in the same order.
        for (own, tagged) in own.iter().zip(&tagged) {
            let message = own.split_once("] ").unwrap().1;
            assert!(tagged.ends_with(message), "{vm}: {own} vs {tagged}");
        }
        assert!(!own.iter().any(|l| l.contains(&format!("[{}]", vm))));
    }
}

#[smol_potat::test]
async fn test_exit_code_tracks_failures_only() {
    let root = TempDir::new().unwrap();
    let all_done = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, BYOS)
            .with_vm("b", SLES, BYOS),
    );
    let report = run(&all_done, options(root.path())).await;
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.summary.exit_code(), 0);

    let one_bad = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, BYOS)
            .with_vm("b", SLES, "")
            .failing_at("b", FailurePoint::LicenseRead),
    );
    let report = run(&one_bad, options(root.path())).await;
    assert_eq!(report.summary.exit_code(), 1);
    assert!(matches!(
        outcome(&report, "b"),
        ConversionOutcome::Failed {
            stage: Stage::LicenseCheck,
            ..
        }
    ));
    assert_eq!(one_bad.dispatches_for("b", ScriptPurpose::Conversion), 0);
}

#[smol_potat::test]
async fn test_unverified_license_still_succeeds() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("slow", SLES, "")
            .lagging_license_update("slow"),
    );
    let report = run(&fleet, options(root.path())).await;

    assert_eq!(
        *outcome(&report, "slow"),
        ConversionOutcome::Succeeded {
            license_verified: false
        }
    );
    assert_eq!(report.summary.unverified, 1);
    assert_eq!(report.summary.exit_code(), 0);

    let log = read_lines(&report.log_dir.join("slow.log")).join("\n");
    assert!(log.contains("[WARN] License type reads '' after the update"));
    assert!(log.contains("succeeded (license unverified)"));

    // The validator sees the same lag and only warns.
    assert!(!report.validation[0].passed);
}

#[smol_potat::test]
async fn test_worker_panic_fails_only_that_target() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_vm("crashy", SLES, "")
            .with_vm("c", SLES, "")
            .panicking_on_dispatch("crashy"),
    );
    let report = run(&fleet, options(root.path()).with_concurrency(2)).await;

    match outcome(&report, "crashy") {
        ConversionOutcome::Failed { stage, cause } => {
            assert_eq!(*stage, Stage::Unknown);
            assert!(cause.contains("simulated crash"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!outcome(&report, "a").is_failed());
    assert!(!outcome(&report, "c").is_failed());
    assert_eq!(report.summary.exit_code(), 1);

    let main_log = report.log_dir.join(MAIN_LOG);
    assert_eq!(
        read_lines(&report.log_dir.join("crashy.log")).len(),
        tagged_lines(&main_log, "crashy").len()
    );
}

#[smol_potat::test]
async fn test_test_mode_logs_only_key_preview() {
    let root = TempDir::new().unwrap();
    let key = "1-0123456789abcdefghijklmnopqrstuvwxyzAB";
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_secret("kv-test", "suma-key", key)
            .with_probe_output("a", TEST_MODE_LISTING),
    );
    let opts = options(root.path())
        .with_test_mode(true)
        .with_key_vault("kv-test", "suma-key");
    let report = run(&fleet, opts).await;

    let main = read_lines(&report.log_dir.join(MAIN_LOG)).join("\n");
    assert!(main.contains("1-0123456789abcdefgh... (40 chars)"));
    assert!(!all_logs(&report.log_dir).contains(key));

    // The key still reaches the target, inside a sensitive script.
    let scripts = fleet.scripts_for("a", ScriptPurpose::Conversion);
    assert!(scripts[0].sensitive);
    assert!(scripts[0].body.contains(key));
    assert!(scripts[0].body.contains("byos-test-marker"));

    assert!(report.validation[0].passed);
    assert!(report.validation[0].detail.contains("byos-test-marker"));
}

#[smol_potat::test]
async fn test_short_key_never_logged_in_full() {
    let root = TempDir::new().unwrap();
    let key = "1-sles15-byos";
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_secret("kv-test", "suma-key", key)
            .with_probe_output("a", TEST_MODE_LISTING),
    );
    let opts = options(root.path())
        .with_test_mode(true)
        .with_key_vault("kv-test", "suma-key");
    let report = run(&fleet, opts).await;

    let main = read_lines(&report.log_dir.join(MAIN_LOG)).join("\n");
    assert!(main.contains("Activation key preview: 1-sles... (13 chars)"));
    assert!(!all_logs(&report.log_dir).contains(key));
}

#[smol_potat::test]
async fn test_marker_without_registered_repository_fails_validation() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_probe_output(
                "a",
                "1 | byos-test-marker | byos-test-marker | No | https://suma.example.com/pub/",
            ),
    );
    let report = run(&fleet, options(root.path()).with_test_mode(true)).await;

    assert_eq!(report.summary.succeeded, 1);
    assert!(!report.validation[0].passed);
    assert!(report.validation[0].detail.contains("no registered repository"));
}

#[smol_potat::test]
async fn test_skip_registration_without_key() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("a", SLES, "")
            .with_probe_output("a", "No repositories defined."),
    );
    let opts = RunOptions::new(GROUP)
        .with_skip_registration(true)
        .with_log_root(root.path())
        .with_inter_target_delay(Duration::ZERO);
    let report = run(&fleet, opts).await;

    assert_eq!(report.summary.succeeded, 1);
    let script = &fleet.scripts_for("a", ScriptPurpose::Conversion)[0];
    assert!(!script.sensitive);
    assert!(!script.body.contains("bootstrap"));
    assert!(!script.body.contains("ACTIVATION_KEYS"));
    assert!(report.validation[0].passed);
}

#[smol_potat::test]
async fn test_production_validation_is_advisory() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("good", SLES, "")
            .with_vm("stray", SLES, "")
            .with_vm("blind", SLES, "")
            .with_probe_output("good", "1 | sles15 | SLES15-SP5-Pool | Yes | https://suma.example.com/rhn/manager/dist")
            .with_probe_output("stray", "1 | other | Other | Yes | https://mirror.example.org/")
            .failing_at("blind", FailurePoint::Probe),
    );
    let report = run(&fleet, options(root.path()).with_concurrency(3)).await;

    assert_eq!(report.summary.exit_code(), 0);
    let by_vm = |vm: &str| report.validation.iter().find(|r| r.vm == vm).unwrap().clone();
    assert!(by_vm("good").passed);
    assert!(!by_vm("stray").passed);
    assert!(by_vm("stray").detail.contains("no repository points at suma.example.com"));
    assert!(!by_vm("blind").passed);
    assert!(by_vm("blind").detail.contains("repository probe failed"));

    let stray_log = read_lines(&report.log_dir.join("stray.log")).join("\n");
    assert!(stray_log.contains("[WARN] ⚠ stray: no repository points at"));
}

#[smol_potat::test]
async fn test_run_directory_layout() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(InMemoryFleet::new().with_vm("a", SLES, ""));
    let report = run(&fleet, options(root.path())).await;

    assert!(report.log_dir.starts_with(root.path()));
    let dir_name = report.log_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(dir_name.starts_with("rg-sap_"));
    assert!(report.log_dir.join(MAIN_LOG).is_file());
    assert!(report.log_dir.join("a.log").is_file());

    let main = read_lines(&report.log_dir.join(MAIN_LOG)).join("\n");
    assert!(main.contains("Succeeded: 1  Skipped: 0  Failed: 0  Total: 1"));
    assert!(main.contains("Run finished with exit code 0"));
}

#[smol_potat::test]
async fn test_log_directory_named_after_preflight_time() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(InMemoryFleet::new().with_vm("a", SLES, ""));
    let prepared = ConversionRun::new(options(root.path()), collaborators(&fleet))
        .preflight()
        .await
        .unwrap();
    let started_at = prepared.started_at();

    // Operator takes a while to confirm
    smol::Timer::after(Duration::from_millis(1100)).await;
    let report = prepared.execute().await.unwrap();

    let expected = format!("{}_{}", GROUP, started_at.format("%Y%m%d_%H%M%S"));
    assert_eq!(report.log_dir.file_name().unwrap().to_string_lossy(), expected);
}
