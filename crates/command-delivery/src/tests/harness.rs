//! Test harness for command sender integration tests.
//!
//! Provides:
//! - MockCommunicator: a scriptable communicator with a recorded send log
//! - RecordingCallback / RecordingFailureCallback: completion listeners
//! - test_config: a fast-timing sender configuration over a temp directory

use crate::communicator::{FailureCallback, RemoteCommunicator};
use crate::config::CommandSenderConfig;
use async_trait::async_trait;
use command_protocol_types::{Command, CommandResponse, CommandSentCallback, SendFailure};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Outcome the mock communicator produces for one send attempt.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Return a successful response.
    Succeed,
    /// Fail as if the endpoint were unreachable.
    FailConnection,
    /// Fail as if the endpoint rejected the command.
    FailRejected,
    /// Fail as if the payload could not be serialized.
    FailNotSerializable,
    /// Hang until the caller's attempt timeout fires.
    NeverRespond,
}

/// Scriptable in-memory communicator.
pub struct MockCommunicator {
    connected: AtomicBool,
    attempts: AtomicU64,
    sent: Mutex<Vec<Command>>,
    scripted: Mutex<VecDeque<ScriptedOutcome>>,
    default_outcome: Mutex<ScriptedOutcome>,
    failure_callback: Mutex<Option<Arc<dyn FailureCallback>>>,
}

impl MockCommunicator {
    /// Create a connected communicator that succeeds by default.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(ScriptedOutcome::Succeed),
            failure_callback: Mutex::new(None),
        })
    }

    /// Set the outcome used when the script queue is empty.
    pub fn set_default_outcome(&self, outcome: ScriptedOutcome) {
        *self.default_outcome.lock().unwrap() = outcome;
    }

    /// Queue an outcome for the next send attempt.
    pub fn queue_outcome(&self, outcome: ScriptedOutcome) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    /// Flip reachability as observed by `is_connected`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Total send attempts observed, including retries.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every command passed to `send`, in invocation order.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCommunicator for MockCommunicator {
    async fn connect(&self) -> Result<(), SendFailure> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &Command) -> Result<CommandResponse, SendFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(command.clone());

        let outcome = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.lock().unwrap().clone());

        match outcome {
            ScriptedOutcome::Succeed => Ok(CommandResponse::success(command.clone(), None)),
            ScriptedOutcome::FailConnection => {
                Err(SendFailure::Connection("connection refused".to_string()))
            }
            ScriptedOutcome::FailRejected => {
                Err(SendFailure::Rejected("endpoint failed command".to_string()))
            }
            ScriptedOutcome::FailNotSerializable => Err(SendFailure::NotSerializable(
                "parameter is not serializable".to_string(),
            )),
            ScriptedOutcome::NeverRespond => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SendFailure::Connection("unreachable".to_string()))
            }
        }
    }

    fn failure_callback(&self) -> Option<Arc<dyn FailureCallback>> {
        self.failure_callback.lock().unwrap().clone()
    }

    fn set_failure_callback(&self, callback: Option<Arc<dyn FailureCallback>>) {
        *self.failure_callback.lock().unwrap() = callback;
    }
}

/// Completion callback that records every response it receives.
pub struct RecordingCallback {
    responses: Mutex<Vec<CommandResponse>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    pub fn responses(&self) -> Vec<CommandResponse> {
        self.responses.lock().unwrap().clone()
    }
}

impl CommandSentCallback for RecordingCallback {
    fn command_sent(&self, response: &CommandResponse) {
        self.responses.lock().unwrap().push(response.clone());
    }
}

/// Connection-failure listener that records every notification.
pub struct RecordingFailureCallback {
    failures: Mutex<Vec<String>>,
}

impl RecordingFailureCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }
}

impl FailureCallback for RecordingFailureCallback {
    fn connection_failed(&self, _command: &Command, failure: &SendFailure) {
        self.failures.lock().unwrap().push(failure.to_string());
    }
}

/// A sender configuration with fast retry timing over a temp directory.
pub fn test_config(dir: &TempDir) -> CommandSenderConfig {
    CommandSenderConfig {
        data_directory: dir.path().to_path_buf(),
        default_timeout_millis: 5_000,
        max_concurrent: 2,
        retry_interval_millis: 20,
        max_retries: 2,
        queue_size: 100,
        server_polling_interval_millis: 0,
        ..Default::default()
    }
}

/// Poll `condition` every 10ms until it holds, or fail the test after
/// `deadline`.
pub async fn wait_until(what: &str, deadline: Duration, mut condition: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "timed out waiting for {what}");
}
