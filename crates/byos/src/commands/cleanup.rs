//! `byos-backup-cleanup`

use crate::cli::CleanupArgs;
use crate::console::{confirm, print_block};
use anyhow::{Context, Result};
use azure_fleet::AzCli;
use byos_orchestrator::{
    BackupCleanup, Collaborators, ConversionProfile, RunLog, Scope, TargetResolver,
    run_log_dir, validate_group, validate_vm_name,
};
use chrono::Local;
use std::io::{self, BufRead};
use std::sync::Arc;

/// Remove repository backups with the `az` CLI; returns the process exit code
pub async fn run(args: CleanupArgs) -> Result<u8> {
    let collaborators = Collaborators::from_fleet(Arc::new(AzCli::new()));
    run_with(args, collaborators, &mut io::stdin().lock()).await
}

/// Remove repository backups through any collaborators
pub async fn run_with(
    args: CleanupArgs,
    collaborators: Collaborators,
    input: &mut impl BufRead,
) -> Result<u8> {
    validate_group(&args.group)?;
    if let Some(vm) = &args.vm {
        validate_vm_name(vm)?;
    }
    collaborators
        .inventory
        .ensure_authenticated()
        .await
        .context("Azure CLI is not logged in")?;

    let profile = ConversionProfile::default();
    let scope = match &args.vm {
        Some(vm) => Scope::Single {
            group: args.group.clone(),
            vm: vm.clone(),
        },
        None => Scope::Group {
            group: args.group.clone(),
        },
    };
    let targets = TargetResolver::new(collaborators.inventory.as_ref(), &profile.family)
        .resolve(&scope)
        .await?;

    let mut plan = vec![
        format!("Scope:   {}", scope),
        format!("Removes: {}", profile.backup_dir),
        format!("Targets ({}):", targets.len()),
    ];
    plan.extend(targets.iter().map(|t| format!("  - {}", t.name)));
    print_block("Backup cleanup plan", &plan);

    if !args.yes
        && !confirm(
            "Only continue once every conversion has been validated. Remove the backups?",
            input,
        )
        .context("Failed to read answer")?
    {
        println!("Aborted, no VM was touched");
        return Ok(0);
    }

    let dir = run_log_dir(&args.log_root, &args.group, Local::now(), Some("cleanup"));
    let log = RunLog::create(dir)?;
    let job = BackupCleanup::new(
        args.group.clone(),
        args.parallel as usize,
        &profile,
        collaborators,
    );
    let report = job.run(targets, &log).await;
    report.write_to(&log);

    println!("\n{}", report.table(true));
    println!("\nLogs: {}", log.dir().display());
    Ok(report.exit_code() as u8)
}
