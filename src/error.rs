//! Error types for hci-snoop

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for hci-snoop operations
pub type Result<T> = std::result::Result<T, SnoopError>;

/// Errors that can occur in hci-snoop
#[derive(Debug, Error)]
pub enum SnoopError {
    /// Capture file could not be opened, written, or rotated
    #[error("Storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        /// Path of the file that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Capture data could not be decoded
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord {
        /// Byte offset where decoding failed
        offset: u64,
        /// What was wrong
        reason: String,
    },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// I/O error outside the capture path
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SnoopError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            offset: offset as u64,
            reason: reason.into(),
        }
    }
}
