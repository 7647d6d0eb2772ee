//! Convert Azure SLES VMs from pay-as-you-go to BYOS licensing

use byos::cli::ConvertArgs;
use byos::{commands, console};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match ConvertArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // Help and version are not errors.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    console::init_tracing(args.verbose);

    match smol::block_on(commands::convert::run(args)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
