//! Console output helpers shared by both binaries

use std::io::{self, BufRead, Write};
use tracing::Level;

/// Colour-coded console logging; `verbose` adds collaborator commands
pub fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    // A second initialisation (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .try_init();
}

/// Ask a yes/no question on stderr; anything but `y`/`yes` means no
pub fn confirm(question: &str, input: &mut impl BufRead) -> io::Result<bool> {
    eprint!("\n{} [y/N] ", question);
    io::stderr().flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

/// Print a titled block of lines
pub fn print_block(title: &str, lines: &[String]) {
    println!("\n{}", title);
    for line in lines {
        println!("  {}", line);
    }
}
