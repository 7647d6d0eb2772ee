//! Raw process events

/// A line of output from a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    /// Which stream the line came from
    pub event_type: ProcessEventType,
    /// The line, without its trailing newline
    pub data: String,
}

impl ProcessEvent {
    /// Create an event carrying one output line
    pub fn new(event_type: ProcessEventType, data: String) -> Self {
        Self { event_type, data }
    }
}

/// Output stream of a process event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEventType {
    /// Log line from stdout
    Stdout,
    /// Log line from stderr
    Stderr,
}
