//! `payg-to-byos`

use crate::cli::ConvertArgs;
use crate::console::{confirm, print_block};
use anyhow::{Context, Result};
use azure_fleet::AzCli;
use byos_orchestrator::{ACTIVATION_KEY_ENV, Collaborators, ConversionRun, RunOptions, RunReport};
use std::io::{self, BufRead};
use std::sync::Arc;

/// Run a conversion with the `az` CLI; returns the process exit code
pub async fn run(args: ConvertArgs) -> Result<u8> {
    let env_secret = std::env::var(ACTIVATION_KEY_ENV).ok();
    let options = args.into_options(env_secret);
    let collaborators = Collaborators::from_fleet(Arc::new(AzCli::new()));
    run_with(options, collaborators, &mut io::stdin().lock()).await
}

/// Run a conversion against any collaborators, reading confirmation from `input`
pub async fn run_with(
    options: RunOptions,
    collaborators: Collaborators,
    input: &mut impl BufRead,
) -> Result<u8> {
    let prepared = ConversionRun::new(options, collaborators)
        .preflight()
        .await
        .context("Pre-flight check failed")?;

    print_block("Conversion plan", &prepared.plan());
    if !prepared.options().auto_confirm
        && !confirm("Proceed with the conversion?", input).context("Failed to read answer")?
    {
        println!("Aborted, no VM was touched");
        return Ok(0);
    }

    let report = prepared.execute().await.context("Conversion run failed")?;
    print_report(&report);
    Ok(report.summary.exit_code() as u8)
}

fn print_report(report: &RunReport) {
    println!("\n{}", report.summary.table(true));
    println!("{}", report.summary.counts_line());
    if report.summary.unverified > 0 {
        println!(
            "{} VM(s) did not report the new license type yet; re-run later to confirm",
            report.summary.unverified
        );
    }
    if !report.validation.is_empty() {
        let lines: Vec<String> = report.validation.iter().map(|r| r.to_string()).collect();
        print_block("Validation (advisory)", &lines);
    }
    println!("\nLogs: {}", report.log_dir.display());
}
