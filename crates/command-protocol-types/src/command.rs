//! The command data model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Well-known config key holding the running retry counter for a command.
///
/// The dispatch workers increment this on every retryable failure, so the
/// count survives a trip through the durable spool along with the command.
pub const RETRY_COUNT_KEY: &str = "delivery.retry-count";

/// Well-known config key holding a per-command timeout override in
/// milliseconds. Absent, the sender's default timeout applies.
pub const TIMEOUT_MILLIS_KEY: &str = "delivery.timeout-millis";

/// An opaque, application-defined unit of work to deliver to a remote
/// endpoint.
///
/// The delivery subsystem never interprets `parameters`; it only reads and
/// writes the well-known entries of `config` (retry counter, timeout
/// override) and the `guaranteed` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Type identifier routed on by the remote endpoint.
    pub command_type: String,
    /// Application payload (opaque to the delivery subsystem).
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Mutable key/value configuration attached to this command.
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Whether delivery must survive process restart via the durable spool.
    #[serde(default)]
    pub guaranteed: bool,
}

impl Command {
    /// Create a new volatile command with no parameters.
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            parameters: HashMap::new(),
            config: HashMap::new(),
            guaranteed: false,
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder-style guaranteed flag.
    pub fn guaranteed(mut self) -> Self {
        self.guaranteed = true;
        self
    }

    /// Read a config entry.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Write a config entry.
    pub fn set_config_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    /// The retry counter recorded under [`RETRY_COUNT_KEY`].
    ///
    /// A missing or unparsable entry reads as zero.
    pub fn retry_count(&self) -> u32 {
        self.config_value(RETRY_COUNT_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Record the retry counter under [`RETRY_COUNT_KEY`].
    pub fn set_retry_count(&mut self, count: u32) {
        self.set_config_value(RETRY_COUNT_KEY, count.to_string());
    }

    /// Per-command timeout override from [`TIMEOUT_MILLIS_KEY`], if set.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.config_value(TIMEOUT_MILLIS_KEY)
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
    }

    /// Set the per-command timeout override.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.set_config_value(TIMEOUT_MILLIS_KEY, timeout.as_millis().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_command_is_volatile() {
        let cmd = Command::new("deploy");
        assert_eq!(cmd.command_type, "deploy");
        assert!(!cmd.guaranteed);
        assert!(cmd.parameters.is_empty());
        assert_eq!(cmd.retry_count(), 0);
    }

    #[test]
    fn test_retry_count_roundtrip() {
        let mut cmd = Command::new("deploy");
        assert_eq!(cmd.retry_count(), 0);

        cmd.set_retry_count(3);
        assert_eq!(cmd.retry_count(), 3);
        assert_eq!(cmd.config_value(RETRY_COUNT_KEY), Some("3"));
    }

    #[test]
    fn test_unparsable_retry_count_reads_as_zero() {
        let mut cmd = Command::new("deploy");
        cmd.set_config_value(RETRY_COUNT_KEY, "not-a-number");
        assert_eq!(cmd.retry_count(), 0);
    }

    #[test]
    fn test_timeout_override() {
        let mut cmd = Command::new("deploy");
        assert!(cmd.timeout_override().is_none());

        cmd.set_timeout(Duration::from_millis(2500));
        assert_eq!(cmd.timeout_override(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_serde_roundtrip_preserves_parameters() {
        let cmd = Command::new("measure")
            .with_parameter("samples", vec![1.5f64, -0.25, 3.0])
            .with_parameter("label", "cpu")
            .guaranteed();

        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();

        assert_eq!(back, cmd);
        assert!(back.guaranteed);
    }
}
