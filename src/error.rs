//! Error types for sql-replay.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for replay operations.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The capture file could not be read.
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The capture file is not an array of log envelopes.
    #[error("Failed to decode capture file: {0}")]
    Decode(#[from] serde_json::Error),

    /// The database could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single statement failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A replay unit panicked or was aborted.
    #[error("Replay unit failed: {0}")]
    Join(String),
}

impl ReplayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap an IO error with the path it came from.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

/// Result type alias for replay operations.
pub type ReplayResult<T> = Result<T, ReplayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReplayError::config("Missing user name");
        assert_eq!(err.to_string(), "Configuration error: Missing user name");
        assert!(err.is_config_error());
    }

    #[test]
    fn test_io_error_names_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ReplayError::io("/tmp/capture.json", source);
        assert!(err.is_io_error());
        assert_eq!(
            err.to_string(),
            "Failed to read '/tmp/capture.json': no such file"
        );
    }

    #[test]
    fn test_decode_from_serde() {
        let source = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err: ReplayError = source.into();
        assert!(err.is_decode_error());
        assert!(!err.is_query_error());
    }
}
