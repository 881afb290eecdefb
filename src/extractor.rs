//! Capture file extraction.
//!
//! A capture file is a JSON export of structured log records:
//!
//! ```text
//! [
//!   { "jsonPayload": { "message": "slow query: SELECT * FROM users" } },
//!   { "jsonPayload": { "message": "update failed\nUPDATE t SET x=1" } }
//! ]
//! ```
//!
//! Extraction runs in two phases: the whole document is decoded into raw
//! records first, then each record is turned into a [`LogEntry`] carrying
//! the statement found in its message. Nothing is filtered out: an entry
//! whose message holds no SQL keeps an empty statement.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ReplayError, ReplayResult};

/// Leftmost whole-word keyword that opens a statement.
static STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SELECT|INSERT|UPDATE|DELETE|WITH RECURSIVE)\b")
        .expect("statement keyword pattern is valid")
});

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "jsonPayload")]
    json_payload: RawPayload,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    message: String,
}

/// One record of a capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The message exactly as it appeared in the capture.
    pub raw_message: String,
    /// The SQL portion of the message, or an empty string.
    pub statement: String,
}

impl LogEntry {
    /// Build an entry from a raw log message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let raw_message = message.into();
        let statement = extract_statement(&raw_message).to_string();
        Self {
            raw_message,
            statement,
        }
    }

    /// Whether a statement keyword was found in the message.
    pub fn has_statement(&self) -> bool {
        !self.statement.is_empty()
    }
}

/// Return the statement embedded in `message`.
///
/// The statement starts at the first `SELECT`, `INSERT`, `UPDATE`,
/// `DELETE` or `WITH RECURSIVE` (any case, whole word) and runs to the end
/// of the message. Case and trailing text are preserved as-is.
///
/// # Example
///
/// ```
/// use sql_replay::extractor::extract_statement;
///
/// let sql = extract_statement("slow: UPDATE t SET x=1 WHERE id=2");
/// assert_eq!(sql, "UPDATE t SET x=1 WHERE id=2");
///
/// // The lowercase word in the log prefix already counts as a keyword.
/// let sql = extract_statement("update failed\nUPDATE t SET x=1 WHERE id=2");
/// assert_eq!(sql, "update failed\nUPDATE t SET x=1 WHERE id=2");
/// assert_eq!(extract_statement("no sql here"), "");
/// ```
pub fn extract_statement(message: &str) -> &str {
    match STATEMENT_START.find(message) {
        Some(m) => &message[m.start()..],
        None => "",
    }
}

/// Decode an in-memory capture document.
pub fn parse_capture(document: &str) -> ReplayResult<Vec<LogEntry>> {
    decode(document.as_bytes())
}

/// Decode raw capture bytes. Invalid UTF-8 is a decode error.
fn decode(bytes: &[u8]) -> ReplayResult<Vec<LogEntry>> {
    let records: Vec<RawRecord> = serde_json::from_slice(bytes)?;

    let entries: Vec<LogEntry> = records
        .into_iter()
        .map(|record| LogEntry::from_message(record.json_payload.message))
        .collect();

    let unmatched = entries.iter().filter(|e| !e.has_statement()).count();
    if unmatched > 0 {
        tracing::debug!(unmatched, "entries without a recognizable statement");
    }

    Ok(entries)
}

/// Read and decode a capture file.
pub fn extract(path: impl AsRef<Path>) -> ReplayResult<Vec<LogEntry>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| ReplayError::io(path, e))?;
    let entries = decode(&bytes)?;

    tracing::info!(
        path = %path.display(),
        entries = entries.len(),
        "extracted statements from capture"
    );

    Ok(entries)
}
