//! Completion callback contract.

use crate::CommandResponse;

/// Listener notified when a command reaches a terminal outcome.
///
/// Invoked from whichever dispatch worker completed the command, so
/// implementations must tolerate calls from any thread.
pub trait CommandSentCallback: Send + Sync {
    /// Called exactly once per accepted command with its terminal response
    /// (success or final failure).
    fn command_sent(&self, response: &CommandResponse);

    /// Whether this callback can survive a trip through the durable spool.
    ///
    /// Callbacks that cannot are still invoked for in-memory deliveries;
    /// the sender drops them (delivering the command anyway) if the command
    /// has to be persisted.
    fn is_persistable(&self) -> bool {
        false
    }
}
