//! Content formatting invoked by execution units.
//!
//! The pool never looks inside a formatter: it hands over text and a path and
//! gets back text or an error. [`TextFormatter`] is the built-in
//! implementation, a whitespace normalizer that works for any text file.

pub mod options;

pub use options::FormatOptions;

use crate::error::FormatError;
use std::path::Path;

/// A pure formatting function: text + path → formatted text.
pub trait Formatter: Send + Sync {
    fn format(
        &self,
        source: &str,
        path: &Path,
        options: &FormatOptions,
    ) -> Result<String, FormatError>;
}

/// Whitespace normalizer.
///
/// - CRLF and lone CR become LF
/// - leading tabs expand to `indent_width` spaces (unless `use_tabs`)
/// - trailing whitespace is removed
/// - runs of blank lines collapse to `max_blank_lines`
/// - leading and trailing blank lines are dropped
/// - non-empty output ends with exactly one newline
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format(
        &self,
        source: &str,
        path: &Path,
        options: &FormatOptions,
    ) -> Result<String, FormatError> {
        if source.contains('\0') {
            return Err(FormatError::Binary {
                path: path.to_path_buf(),
            });
        }

        let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
        let mut out = String::with_capacity(normalized.len() + 1);
        let mut pending_blanks = 0usize;

        for raw in normalized.split('\n') {
            let line = normalize_line(raw, options);
            if line.is_empty() {
                pending_blanks += 1;
                continue;
            }
            if !out.is_empty() {
                for _ in 0..pending_blanks.min(options.max_blank_lines) {
                    out.push('\n');
                }
            }
            pending_blanks = 0;
            out.push_str(&line);
            out.push('\n');
        }

        Ok(out)
    }
}

/// Expand leading indentation and trim the end of one line.
fn normalize_line(line: &str, options: &FormatOptions) -> String {
    let trimmed = line.trim_end();
    if options.use_tabs {
        return trimmed.to_string();
    }

    let width = options.indent_width.max(1);
    let mut column = 0usize;
    let mut rest = trimmed;
    for (idx, ch) in trimmed.char_indices() {
        match ch {
            ' ' => column += 1,
            '\t' => column = (column / width + 1) * width,
            _ => {
                rest = &trimmed[idx..];
                break;
            }
        }
    }
    if rest.len() == trimmed.len() {
        return trimmed.to_string();
    }

    let mut expanded = " ".repeat(column);
    expanded.push_str(rest);
    expanded
}
