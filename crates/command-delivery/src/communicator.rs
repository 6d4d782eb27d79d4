//! The remote communicator boundary.
//!
//! The delivery subsystem never talks to the wire itself; it hands commands
//! to a [`RemoteCommunicator`] and classifies the outcome. Transport,
//! serialization format, and authentication all live behind this trait.

use async_trait::async_trait;
use command_protocol_types::{Command, CommandResponse, SendFailure};
use std::sync::Arc;

/// Listener notified when a delivery attempt fails at the connection level.
///
/// Communicator owners use this to trigger reconnect or failover logic;
/// the sender invokes it from whichever worker observed the failure.
pub trait FailureCallback: Send + Sync {
    /// Called when `command` could not be transmitted because the remote
    /// endpoint was unreachable.
    fn connection_failed(&self, command: &Command, failure: &SendFailure);
}

/// Carries a command to the remote endpoint and returns its response.
#[async_trait]
pub trait RemoteCommunicator: Send + Sync {
    /// Establish the underlying connection.
    async fn connect(&self) -> Result<(), SendFailure>;

    /// Tear down the underlying connection.
    async fn disconnect(&self);

    /// Whether the remote endpoint is currently reachable.
    async fn is_connected(&self) -> bool;

    /// Deliver one command and wait for the endpoint's response.
    ///
    /// Outcome contract:
    /// - `Err(SendFailure::Connection(_))`: the endpoint could not be
    ///   reached at all; the sender retries these indefinitely.
    /// - `Err(SendFailure::Rejected(_))`: the endpoint was reached but the
    ///   command failed; counts against the command's retry budget.
    /// - `Err(SendFailure::NotSerializable(_))`: the payload cannot cross
    ///   the wire; the sender fails the command without retrying.
    /// - `Ok(response)`: a definitive outcome, never retried, including
    ///   responses whose `successful` flag is false.
    async fn send(&self, command: &Command) -> Result<CommandResponse, SendFailure>;

    /// The currently registered connection-failure listener, if any.
    fn failure_callback(&self) -> Option<Arc<dyn FailureCallback>>;

    /// Register or clear the connection-failure listener.
    fn set_failure_callback(&self, callback: Option<Arc<dyn FailureCallback>>);
}
