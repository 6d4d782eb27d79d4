//! Error types for command delivery.

use thiserror::Error;

/// Delivery error type.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Synchronous send attempted before the sender was started
    #[error("command sender has not been started")]
    NotStarted,

    /// Bounded queue rejected a submission that could not be spooled
    #[error("command queue is full (capacity {0})")]
    QueueFull(usize),

    /// Configuration validation error
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Durable spool error
    #[error("spool error: {0}")]
    Spool(#[from] command_spool::SpoolError),

    /// IO error (configuration file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration encoding)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;
