//! Pure command protocol types for the delivery subsystem.
//!
//! This crate defines the vocabulary shared by everything that produces,
//! transports, or completes commands:
//!
//! - [`Command`]: an opaque, application-defined unit of work
//! - [`CommandResponse`]: the terminal outcome of a delivery attempt
//! - [`SendFailure`] / [`FailureKind`]: tagged failure classification
//!   consumed by the sender's retry policy
//! - [`CommandSentCallback`]: the completion listener contract
//!
//! No I/O, no async — implementations live in `command-spool` and
//! `command-delivery`.

mod callback;
mod command;
mod failure;
mod response;

pub use callback::CommandSentCallback;
pub use command::{Command, RETRY_COUNT_KEY, TIMEOUT_MILLIS_KEY};
pub use failure::{CommandFailureKind, FailureKind, SendFailure};
pub use response::CommandResponse;
