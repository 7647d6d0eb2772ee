//! Command type for building executable commands

use async_process::Command as AsyncCommand;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;

/// Placeholder rendered in place of sensitive arguments
pub const REDACTED: &str = "<redacted>";

/// A command to be executed
///
/// This is a builder for creating commands that can be converted to `async_process::Command`
/// when needed. Unlike `AsyncCommand`, this type is `Clone` and can be reused multiple times.
///
/// Arguments added with [`Command::sensitive_arg`] are passed to the process unchanged but
/// never appear in the [`Display`](fmt::Display) rendering, which is what every log line uses.
#[derive(Debug, Clone)]
pub struct Command {
    /// The program to execute
    program: OsString,
    /// The arguments to pass to the program
    args: Vec<Arg>,
    /// Environment variables to set
    env: HashMap<OsString, OsString>,
}

#[derive(Clone)]
struct Arg {
    value: OsString,
    sensitive: bool,
}

// Keep sensitive values out of `{:?}` output as well.
impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            f.write_str(REDACTED)
        } else {
            fmt::Debug::fmt(&self.value, f)
        }
    }
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(Arg {
            value: arg.as_ref().to_owned(),
            sensitive: false,
        });
        self
    }

    /// Add an argument that must never be rendered in logs
    pub fn sensitive_arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(Arg {
            value: arg.as_ref().to_owned(),
            sensitive: true,
        });
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);

        for arg in &self.args {
            cmd.arg(&arg.value);
        }
        for (key, val) in &self.env {
            cmd.env(key, val);
        }

        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            if arg.sensitive {
                write!(f, " {}", REDACTED)?;
            } else {
                write!(f, " {}", shell_quote(&arg.value.to_string_lossy()))?;
            }
        }
        Ok(())
    }
}

/// Quote a string for display the way a shell user would type it
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}".contains(c)) {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
