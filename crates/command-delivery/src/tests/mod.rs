//! Integration tests for the command sender.
//!
//! Test organization:
//!
//! - `harness.rs`    - Mock communicator, recording callbacks, shared config
//! - `sending.rs`    - Submission paths and delivery metrics
//! - `guaranteed.rs` - Durable spool fallback, replay, and restart recovery
//! - `retry.rs`      - Failure classification and retry policy
//! - `lifecycle.rs`  - Start/stop, draining, and reconstitution

mod guaranteed;
pub(crate) mod harness;
