//! parafmt - parallel file formatter.
//!
//! Discovered files are grouped into batches and dispatched to a pool of
//! isolated execution units (child processes or threads). Each unit formats
//! its batch and answers with the files it changed or failed on.

pub mod cli;
pub mod discovery;
pub mod error;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod worker;

pub use error::{FormatError, ParafmtError, Result};
