//! Spool error types.

use thiserror::Error;

/// Spool error type.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// IO error (backing file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (object record encoding)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record whose encoding is invalid (bad state byte, length mismatch)
    #[error("invalid record encoding: {0}")]
    InvalidRecord(String),

    /// A record in the backing file that cannot be read back
    #[error("corrupt spool record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// A record too large to ever fit in the configured file size
    #[error("record of {size} bytes cannot fit in spool of maximum size {max}")]
    RecordTooLarge { size: u64, max: u64 },
}

/// Result type for spool operations.
pub type SpoolResult<T> = Result<T, SpoolError>;
