//! Tagged failure classification for delivery attempts.

use std::time::Duration;
use thiserror::Error;

/// A failed delivery attempt, as reported by the communicator boundary
/// (or synthesized by the sender for attempt timeouts).
///
/// The sender's retry policy branches on [`SendFailure::kind`], never on
/// concrete error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The remote endpoint could not be reached at all.
    #[error("cannot reach remote endpoint: {0}")]
    Connection(String),

    /// The remote endpoint was reached but rejected or failed the command.
    #[error("remote endpoint failed command: {0}")]
    Rejected(String),

    /// No response arrived within the effective per-command timeout.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// The command payload cannot be serialized for transmission or
    /// spooling. Retrying cannot succeed.
    #[error("command payload is not serializable: {0}")]
    NotSerializable(String),
}

/// Coarse failure classification driving the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Endpoint unreachable. Network partitions are expected to heal, so
    /// guaranteed delivery retries these indefinitely.
    Connection,
    /// Endpoint reachable, command failed. Retried up to the configured
    /// maximum.
    Command(CommandFailureKind),
    /// Unserializable payload. Terminal, zero retries.
    NotSerializable,
}

/// Sub-classification of reached-but-failed outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFailureKind {
    /// The attempt timed out waiting for a response.
    Timeout,
    /// The endpoint rejected or failed the command.
    Rejected,
}

impl SendFailure {
    /// The classification consumed by the sender's retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) => FailureKind::Connection,
            Self::Timeout(_) => FailureKind::Command(CommandFailureKind::Timeout),
            Self::Rejected(_) => FailureKind::Command(CommandFailureKind::Rejected),
            Self::NotSerializable(_) => FailureKind::NotSerializable,
        }
    }
}
