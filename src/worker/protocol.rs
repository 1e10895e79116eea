//! Envelope protocol between the controller and execution units.
//!
//! Messages are JSON-serialized and newline-delimited. Every envelope carries
//! a `type` discriminator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One discovered file to format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Working directory of the run that discovered the file.
    pub cwd: PathBuf,
    /// Root the file was discovered under (used for display).
    pub base: PathBuf,
    /// Absolute path of the file.
    pub path: PathBuf,
}

impl FileDescriptor {
    pub fn new(
        cwd: impl Into<PathBuf>,
        base: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cwd: cwd.into(),
            base: base.into(),
            path: path.into(),
        }
    }

    /// Path relative to `base`, falling back to the full path.
    pub fn display_path(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

/// How a unit applies formatting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Persist changed content to the same path.
    Write,
    /// Emit changed content to the run's output stream.
    Print,
    /// Only report divergence.
    Assert,
}

impl Mode {
    /// Derive the mode from the CLI's check/write flags. Check wins.
    pub fn from_flags(check: bool, write: bool) -> Self {
        if check {
            Self::Assert
        } else if write {
            Self::Write
        } else {
            Self::Print
        }
    }
}

/// One dispatch batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: u64,
    pub files: Vec<FileDescriptor>,
}

/// Result of formatting one [`WorkUnit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatResult {
    /// Id of the work unit this answers.
    pub id: u64,
    /// Number of files in the work unit.
    pub total: usize,
    /// Files whose content changed.
    pub formatted: Vec<FileDescriptor>,
    /// Files that could not be formatted.
    pub failed: Vec<FileDescriptor>,
}

impl FormatResult {
    /// Empty result for a work unit of `total` files.
    pub fn empty(id: u64, total: usize) -> Self {
        Self {
            id,
            total,
            ..Default::default()
        }
    }
}

/// Message from the controller to an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMessage {
    /// Sent once per unit, before any work.
    Init { mode: Mode },
    /// One work unit to format.
    Files(WorkUnit),
}

/// Message from an execution unit to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UnitMessage {
    /// Outcome of one `Files` message.
    Result(FormatResult),
}

impl ControllerMessage {
    pub fn init(mode: Mode) -> Self {
        Self::Init { mode }
    }

    pub fn files(id: u64, files: Vec<FileDescriptor>) -> Self {
        Self::Files(WorkUnit { id, files })
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl UnitMessage {
    /// Id of the work unit this message answers.
    pub fn id(&self) -> u64 {
        match self {
            Self::Result(result) => result.id,
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}
