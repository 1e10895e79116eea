//! Error types for parafmt.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for parafmt.
///
/// Per-file formatting problems never surface here; they are recorded in a
/// batch's `failed` list instead (see [`FormatError`]).
#[derive(Error, Debug)]
pub enum ParafmtError {
    #[error("Execution unit {unit} exited: {reason}")]
    UnitExited { unit: String, reason: String },

    #[error("Transport error on {unit}: {message}")]
    Transport { unit: String, message: String },

    #[error("Failed to spawn execution unit: {0}")]
    Spawn(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Cannot read {}: {message}", path.display())]
    Discovery { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParafmtError {
    /// Whether this error means an execution unit is gone and the run must abort.
    pub fn is_fatal_unit_error(&self) -> bool {
        matches!(self, Self::UnitExited { .. } | Self::Transport { .. })
    }

    /// Rebuild an equivalent error for every caller affected by one failure.
    ///
    /// Only unit and pool errors are replayed; anything else collapses to
    /// `UnitExited` with the original message as the reason.
    pub(crate) fn replay(&self) -> Self {
        match self {
            Self::UnitExited { unit, reason } => Self::UnitExited {
                unit: unit.clone(),
                reason: reason.clone(),
            },
            Self::Transport { unit, message } => Self::Transport {
                unit: unit.clone(),
                message: message.clone(),
            },
            Self::PoolClosed => Self::PoolClosed,
            Self::Spawn(msg) => Self::Spawn(msg.clone()),
            other => Self::UnitExited {
                unit: "pool".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for parafmt operations.
pub type Result<T> = std::result::Result<T, ParafmtError>;

/// Failure to format a single file. Recovered locally by the runner.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("{} looks like a binary file", path.display())]
    Binary { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unit_exited_message() {
        let err = ParafmtError::UnitExited {
            unit: "process-2".to_string(),
            reason: "killed by signal SIGKILL".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("process-2"));
        assert!(msg.contains("SIGKILL"));
        assert!(err.is_fatal_unit_error());
    }

    #[test]
    fn test_transport_is_fatal() {
        let err = ParafmtError::Transport {
            unit: "thread-0".to_string(),
            message: "invalid envelope".to_string(),
        };
        assert!(err.is_fatal_unit_error());
        assert!(!ParafmtError::PoolClosed.is_fatal_unit_error());
    }

    #[test]
    fn test_replay_preserves_unit_errors() {
        let err = ParafmtError::UnitExited {
            unit: "thread-1".to_string(),
            reason: "panicked".to_string(),
        };
        match err.replay() {
            ParafmtError::UnitExited { unit, reason } => {
                assert_eq!(unit, "thread-1");
                assert_eq!(reason, "panicked");
            }
            other => panic!("Expected UnitExited, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_collapses_other_errors() {
        let err = ParafmtError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        let replayed = err.replay();
        assert!(replayed.is_fatal_unit_error());
        assert!(replayed.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_discovery_message() {
        let err = ParafmtError::Discovery {
            path: PathBuf::from("/missing/dir"),
            message: "No such file or directory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/missing/dir"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ParafmtError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: ParafmtError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn test_format_error_messages() {
        let err = FormatError::Binary {
            path: PathBuf::from("logo.png"),
        };
        assert!(err.to_string().contains("logo.png"));

        let err = FormatError::Config {
            path: PathBuf::from("/repo/.parafmt.json"),
            message: "expected value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains(".parafmt.json"));
        assert!(msg.contains("expected value"));
    }
}
