//! Journal error types.

use thiserror::Error;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("invalid record header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("sequence gap at offset {offset}: expected {expected}, found {found}")]
    SequenceGap {
        offset: u64,
        expected: u64,
        found: u64,
    },

    #[error("journal is closed")]
    Closed,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JournalError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JournalError::Io(_))
    }

    /// Returns whether this error means the journal contents cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            JournalError::CorruptedRecord { .. }
                | JournalError::InvalidHeader { .. }
                | JournalError::SequenceGap { .. }
        )
    }
}
