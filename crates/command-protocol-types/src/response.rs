//! Command delivery outcomes.

use crate::Command;
use serde::{Deserialize, Serialize};

/// The terminal outcome of delivering a [`Command`].
///
/// Every accepted command eventually produces exactly one response,
/// whether delivery succeeded or exhausted its retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// The originating command, echoed back (including any retry counter
    /// the dispatch workers recorded on its config).
    pub command: Command,
    /// Whether the command was delivered and executed successfully.
    pub successful: bool,
    /// Result payload produced by the remote endpoint (opaque).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Human-readable error description for unsuccessful outcomes.
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandResponse {
    /// A successful response with an optional result payload.
    pub fn success(command: Command, result: Option<serde_json::Value>) -> Self {
        Self {
            command,
            successful: true,
            result,
            error: None,
        }
    }

    /// An unsuccessful response with an error description.
    pub fn failure(command: Command, error: impl Into<String>) -> Self {
        Self {
            command,
            successful: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Whether this response reflects a successful delivery.
    pub fn is_successful(&self) -> bool {
        self.successful
    }
}
