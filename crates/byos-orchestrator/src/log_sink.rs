//! Per-run log directory
//!
//! A run writes `main.log`, holding every record tagged with the VM it came
//! from, and one `<vm>.log` per target holding only that target's records.
//! Each record is a single line written with one `write_all` while the file
//! lock is held, so concurrent workers never interleave partial lines.
//! Every record is also emitted as a `tracing` event for the console.

use crate::{Error, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name of the aggregate log inside a run directory
pub const MAIN_LOG: &str = "main.log";

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Progress
    Info,
    /// Something the operator should look at
    Warn,
    /// A failure
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Directory for a run: `<root>/<group>_<YYYYmmdd_HHMMSS>[_<label>]`
///
/// Falls back to an extra 8-character random suffix when a run with the same
/// name already exists.
pub fn run_log_dir(
    root: &Path,
    group: &str,
    started_at: DateTime<Local>,
    label: Option<&str>,
) -> PathBuf {
    let mut name = format!("{}_{}", group, started_at.format("%Y%m%d_%H%M%S"));
    if let Some(label) = label {
        name.push('_');
        name.push_str(label);
    }
    let dir = root.join(&name);
    if dir.exists() {
        let suffix = Uuid::new_v4().simple().to_string();
        root.join(format!("{}_{}", name, &suffix[..8]))
    } else {
        dir
    }
}

fn format_line(
    timestamp: &str,
    severity: Severity,
    vm: Option<&str>,
    message: &str,
) -> String {
    match vm {
        Some(vm) => format!("{} [{}] [{}] {}\n", timestamp, severity, vm, message),
        None => format!("{} [{}] {}\n", timestamp, severity, message),
    }
}

fn mirror(severity: Severity, vm: Option<&str>, message: &str) {
    match (severity, vm) {
        (Severity::Info, Some(vm)) => info!(vm, "{}", message),
        (Severity::Warn, Some(vm)) => warn!(vm, "{}", message),
        (Severity::Error, Some(vm)) => error!(vm, "{}", message),
        (Severity::Info, None) => info!("{}", message),
        (Severity::Warn, None) => warn!("{}", message),
        (Severity::Error, None) => error!("{}", message),
    }
}

/// Non-blank lines of a possibly multi-line message
fn record_lines(message: &str) -> impl Iterator<Item = &str> {
    message
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
}

fn append(file: &Mutex<File>, path: &Path, line: &str) {
    let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = file.write_all(line.as_bytes()) {
        warn!(path = %path.display(), error = %e, "Failed to write log record");
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::log_sink(path, e))
}

/// Aggregate log of one run
#[derive(Debug)]
pub struct RunLog {
    dir: PathBuf,
    main_path: PathBuf,
    main: Mutex<File>,
}

impl RunLog {
    /// Create the run directory and open `main.log`
    pub fn create(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::log_sink(&dir, e))?;
        let main_path = dir.join(MAIN_LOG);
        let main = open_append(&main_path)?;
        Ok(Arc::new(Self {
            dir,
            main_path,
            main: Mutex::new(main),
        }))
    }

    /// Run directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of `main.log`
    pub fn main_log_path(&self) -> &Path {
        &self.main_path
    }

    /// Path of a target's log
    pub fn target_log_path(&self, vm: &str) -> PathBuf {
        self.dir.join(format!("{}.log", vm))
    }

    /// Record a run-level message in `main.log` only
    pub fn record(&self, severity: Severity, message: impl AsRef<str>) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for line in record_lines(message.as_ref()) {
            append(
                &self.main,
                &self.main_path,
                &format_line(&timestamp, severity, None, line),
            );
            mirror(severity, None, line);
        }
    }

    /// Record a run-level message in `main.log` without mirroring it to the console
    pub fn record_file_only(&self, severity: Severity, message: impl AsRef<str>) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for line in record_lines(message.as_ref()) {
            append(
                &self.main,
                &self.main_path,
                &format_line(&timestamp, severity, None, line),
            );
        }
    }

    /// Run-level info record
    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Severity::Info, message);
    }

    /// Run-level warning record
    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(Severity::Warn, message);
    }

    /// Run-level error record
    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Severity::Error, message);
    }

    /// Open (or reopen, appending) the log of one target
    pub fn target(self: &Arc<Self>, vm: &str) -> Result<TargetLog> {
        let path = self.target_log_path(vm);
        let file = open_append(&path)?;
        Ok(TargetLog {
            run: Arc::clone(self),
            vm: vm.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    fn append_tagged(&self, timestamp: &str, severity: Severity, vm: &str, line: &str) {
        append(
            &self.main,
            &self.main_path,
            &format_line(timestamp, severity, Some(vm), line),
        );
    }
}

/// Logger for one target
///
/// Every record goes to the target's own file, untagged, and to `main.log`,
/// tagged with the VM name.
#[derive(Debug)]
pub struct TargetLog {
    run: Arc<RunLog>,
    vm: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl TargetLog {
    /// VM this logger belongs to
    pub fn vm(&self) -> &str {
        &self.vm
    }

    /// Path of the target's log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a message; multi-line messages become one record per line
    pub fn record(&self, severity: Severity, message: impl AsRef<str>) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for line in record_lines(message.as_ref()) {
            append(
                &self.file,
                &self.path,
                &format_line(&timestamp, severity, None, line),
            );
            self.run.append_tagged(&timestamp, severity, &self.vm, line);
            mirror(severity, Some(&self.vm), line);
        }
    }

    /// Info record
    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Severity::Info, message);
    }

    /// Warning record
    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(Severity::Warn, message);
    }

    /// Error record
    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Severity::Error, message);
    }
}
