//! Termination analysis for execution units.
//!
//! Turns a child's exit status or a thread's join outcome into a reason that
//! can be reported with `UnitExited`.

use nix::sys::signal::Signal;
use std::any::Any;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Reason why an execution unit stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a known signal.
    Signaled(Signal),
    /// Killed by a signal nix does not know about.
    UnknownSignal(i32),
    /// Thread unit panicked.
    Panicked(String),
    /// Thread unit returned an error.
    Failed(String),
    /// Transport closed without an observable exit status.
    Disconnected,
}

impl TerminationReason {
    /// Classify a child process exit status.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal() {
            Some(raw) => Signal::try_from(raw)
                .map(Self::Signaled)
                .unwrap_or(Self::UnknownSignal(raw)),
            None => Self::Disconnected,
        }
    }

    /// Classify the payload of a panicked thread.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {}", sig.as_str()),
            Self::UnknownSignal(raw) => format!("killed by signal {}", raw),
            Self::Panicked(msg) => format!("panicked: {}", msg),
            Self::Failed(msg) => format!("failed: {}", msg),
            Self::Disconnected => "connection closed".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
