//! Shared parsing utilities for batch scheduler command output.
//!
//! This crate provides the parsing primitives and command execution
//! plumbing used by every scheduler dialect, so the per-dialect crates only
//! describe their own vocabulary.

pub mod command;
pub mod records;
pub mod scripted;
pub mod shell;
pub mod time;
pub mod xml;

use thiserror::Error;

pub use command::{CommandError, CommandOutput, CommandRunner, LocalCommandRunner, command_line};
pub use records::{
    Record, Records, Separator, index_records, parse_key_values, parse_keyed_blocks, parse_table,
};
pub use scripted::{Invocation, ScriptedRunner};
pub use shell::{join_ids, shell_quote};
pub use time::{format_walltime, parse_exit_code, parse_exit_signal};
pub use xml::{XmlRoot, xml_records, xml_root};

/// Scheduler output did not have the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}: {fragment:?}")]
pub struct ParseError {
    /// What was expected.
    pub message: String,
    /// The offending line or fragment, verbatim.
    pub fragment: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || trimmed == "-"
        || trimmed == "N/A"
        || trimmed == "NONE"
        || trimmed == "(null)"
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a delimited line and validate the field count.
pub fn split_delimited<'a>(
    line: &'a str,
    separator: &str,
    expected: usize,
) -> Result<Vec<&'a str>, ParseError> {
    let fields: Vec<&str> = line.split(separator).map(str::trim).collect();
    if fields.len() != expected {
        return Err(ParseError::new(
            format!("expected {} fields, got {}", expected, fields.len()),
            line,
        ));
    }
    Ok(fields)
}
