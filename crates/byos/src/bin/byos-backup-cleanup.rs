//! Remove the repository backups left by a conversion run

use byos::cli::CleanupArgs;
use byos::{commands, console};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match CleanupArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    console::init_tracing(args.verbose);

    match smol::block_on(commands::cleanup::run(args)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
