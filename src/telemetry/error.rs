//! Telemetry error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during audit log operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to open, write or read an audit file.
    #[error("Audit file I/O failed for {path}: {source}")]
    Io {
        /// File involved in the operation.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to serialize a snapshot to JSON.
    #[error("Failed to serialize snapshot: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An audit line could not be parsed back into an entry.
    #[error("Invalid audit line: {reason}")]
    InvalidLine {
        /// What was wrong with the line.
        reason: String,
    },
}

impl TelemetryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TelemetryError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_line(reason: impl Into<String>) -> Self {
        TelemetryError::InvalidLine {
            reason: reason.into(),
        }
    }
}
