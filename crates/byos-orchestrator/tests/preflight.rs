//! Pre-flight: argument validation, target resolution and credentials

mod common;

use azure_fleet::InMemoryFleet;
use byos_orchestrator::{
    ConversionRun, CredentialSource, Error, RunOptions, ACTIVATION_KEY_ENV,
};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

fn sles_fleet() -> Arc<InMemoryFleet> {
    Arc::new(
        InMemoryFleet::new()
            .with_vm("sap-01", "SLES-SAP-15-SP5:gen2", "")
            .with_vm("jump-01", "UbuntuServer:22_04-lts", "")
            .with_vm("sap-02", "sles-15-sp5:gen2", "SLES_BYOS"),
    )
}

async fn preflight(
    fleet: &Arc<InMemoryFleet>,
    options: RunOptions,
) -> byos_orchestrator::Result<byos_orchestrator::PreparedRun> {
    ConversionRun::new(options, collaborators(fleet)).preflight().await
}

#[smol_potat::test]
async fn test_injection_in_server_rejected_before_any_call() {
    let root = TempDir::new().unwrap();
    for bad in [
        "suma.example.com;reboot",
        "suma.example.com&id",
        "suma.example.com|id",
        "suma$HOME.example.com",
        "suma`id`.example.com",
    ] {
        let fleet = sles_fleet();
        let err = preflight(&fleet, options(root.path()).with_server(bad))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidServerHostname { .. }), "{bad}");
        assert_eq!(fleet.call_count(), 0, "{bad}");
    }
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[smol_potat::test]
async fn test_unauthenticated_session_aborts() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(InMemoryFleet::new().with_vm("sap-01", SLES, "").unauthenticated());
    let err = preflight(&fleet, options(root.path())).await.err().unwrap();
    assert!(matches!(
        err,
        Error::Provider(azure_fleet::Error::NotAuthenticated(_))
    ));
}

#[smol_potat::test]
async fn test_group_resolution_filters_family_in_inventory_order() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let prepared = preflight(&fleet, options(root.path())).await.unwrap();

    let names: Vec<_> = prepared.targets().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["sap-01", "sap-02"]);
}

#[smol_potat::test]
async fn test_no_targets_found() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(InMemoryFleet::new().with_vm("jump-01", "UbuntuServer:22_04-lts", ""));
    let err = preflight(&fleet, options(root.path())).await.err().unwrap();
    assert!(matches!(err, Error::NoTargetsFound { ref family, .. } if family == "sles"));
}

#[smol_potat::test]
async fn test_single_target_not_found_before_credentials() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    // No key configured at all: a credential error would surface if the
    // resolver did not fail first.
    let opts = options(root.path()).with_env_secret(None).with_vm("missing-vm");
    let err = preflight(&fleet, opts).await.err().unwrap();

    assert!(matches!(err, Error::TargetNotFound { ref vm, .. } if vm == "missing-vm"));
    assert_eq!(fleet.dispatches_for("missing-vm", azure_fleet::ScriptPurpose::Conversion), 0);
}

#[smol_potat::test]
async fn test_single_target_resolves_even_outside_family() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let prepared = preflight(&fleet, options(root.path()).with_vm("jump-01"))
        .await
        .unwrap();
    assert_eq!(prepared.targets().len(), 1);
    assert_eq!(prepared.targets()[0].name, "jump-01");
}

#[smol_potat::test]
async fn test_production_without_key_is_fatal() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let err = preflight(&fleet, options(root.path()).with_env_secret(None))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::MissingActivationKey { env_var } if env_var == ACTIVATION_KEY_ENV
    ));
}

#[smol_potat::test]
async fn test_key_vault_failure_does_not_fall_back() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let opts = options(root.path()).with_key_vault("kv-prod", "missing-secret");
    let err = preflight(&fleet, opts).await.err().unwrap();

    match err {
        Error::SecretStore { store, name, reason } => {
            assert_eq!(store, "kv-prod");
            assert_eq!(name, "missing-secret");
            assert!(reason.contains("SecretNotFound"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[smol_potat::test]
async fn test_empty_key_vault_secret_is_fatal() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("sap-01", SLES, "")
            .with_secret("kv-prod", "suma-key", ""),
    );
    let opts = options(root.path()).with_key_vault("kv-prod", "suma-key");
    assert!(matches!(
        preflight(&fleet, opts).await,
        Err(Error::SecretStore { .. })
    ));
}

#[smol_potat::test]
async fn test_key_vault_wins_over_environment() {
    let root = TempDir::new().unwrap();
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("sap-01", SLES, "")
            .with_secret("kv-prod", "suma-key", "1-vault-key"),
    );
    let opts = options(root.path()).with_key_vault("kv-prod", "suma-key");
    let prepared = preflight(&fleet, opts).await.unwrap();

    let credential = prepared.credential();
    assert_eq!(credential.secret.as_ref().unwrap().expose(), "1-vault-key");
    assert_eq!(
        credential.source,
        CredentialSource::SecretStore {
            store: "kv-prod".into(),
            name: "suma-key".into()
        }
    );
    assert!(credential.preview.is_none());
}

#[smol_potat::test]
async fn test_environment_key() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let prepared = preflight(&fleet, options(root.path())).await.unwrap();
    assert_eq!(prepared.credential().source, CredentialSource::Environment);
    assert!(!prepared.credential().skip_activation_key());
}

#[smol_potat::test]
async fn test_skip_registration_proceeds_without_key() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let opts = RunOptions::new(GROUP)
        .with_skip_registration(true)
        .with_log_root(root.path());
    let prepared = preflight(&fleet, opts).await.unwrap();

    assert!(prepared.credential().skip_activation_key());
    assert_eq!(prepared.credential().source, CredentialSource::Absent);
    assert!(prepared.plan().iter().any(|l| l.contains("(skipped)")));
}

#[smol_potat::test]
async fn test_test_mode_shows_bounded_key_preview() {
    let root = TempDir::new().unwrap();
    let key = "1-0123456789abcdefghijklmnopqrstuvwxyzAB";
    assert_eq!(key.len(), 40);
    let fleet = Arc::new(
        InMemoryFleet::new()
            .with_vm("sap-01", SLES, "")
            .with_secret("kv-test", "suma-key", key),
    );
    let opts = options(root.path())
        .with_test_mode(true)
        .with_key_vault("kv-test", "suma-key");
    let prepared = preflight(&fleet, opts).await.unwrap();

    let preview = prepared.credential().preview.clone().unwrap();
    assert_eq!(preview, "1-0123456789abcdefgh... (40 chars)");
    assert!(!preview.contains(key));
    assert!(prepared.plan().iter().any(|l| l.contains(&preview)));
}

#[smol_potat::test]
async fn test_plan_lists_targets() {
    let root = TempDir::new().unwrap();
    let fleet = sles_fleet();
    let prepared = preflight(&fleet, options(root.path()).with_concurrency(2))
        .await
        .unwrap();
    let plan = prepared.plan().join("\n");

    assert!(plan.contains("resource group 'rg-sap'"));
    assert!(plan.contains("Concurrency:         2"));
    assert!(plan.contains("  - sap-01 (SLES-SAP-15-SP5:gen2)"));
    assert!(plan.contains(SERVER));
    assert!(!plan.contains("1-env-activation-key"));
}
