//! Per-directory formatting options.
//!
//! The nearest `.parafmt.json` above a file configures how it is formatted.

use crate::error::FormatError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the options file looked up next to formatted files.
pub const CONFIG_FILENAME: &str = ".parafmt.json";

/// Options for the built-in text formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatOptions {
    /// Spaces per tab stop when expanding leading tabs.
    pub indent_width: usize,
    /// Keep leading tabs instead of expanding them.
    pub use_tabs: bool,
    /// Longest allowed run of blank lines.
    pub max_blank_lines: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent_width: 4,
            use_tabs: false,
            max_blank_lines: 1,
        }
    }
}

/// Find the nearest options file at or above the directory holding `path`.
pub async fn find_config(path: &Path) -> Option<PathBuf> {
    for dir in path.parent()?.ancestors() {
        let candidate = dir.join(CONFIG_FILENAME);
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|metadata| metadata.is_file())
        {
            return Some(candidate);
        }
    }
    None
}

/// Resolve the options that apply to `path`.
///
/// Falls back to defaults when no options file exists. A malformed file is an
/// error for every file it governs.
pub async fn resolve(path: &Path) -> Result<FormatOptions, FormatError> {
    let Some(config_path) = find_config(path).await else {
        return Ok(FormatOptions::default());
    };

    let contents = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| FormatError::Config {
            path: config_path.clone(),
            message: e.to_string(),
        })?;
    serde_json::from_str(&contents).map_err(|e| FormatError::Config {
        path: config_path,
        message: e.to_string(),
    })
}
