//! Reliable asynchronous command delivery.
//!
//! This crate accepts outbound commands from application code, queues
//! them, throttles their release, dispatches them with bounded concurrency
//! to a remote endpoint, retries transient failures, and persists
//! guaranteed commands to disk so they survive process restarts and
//! prolonged unreachability.
//!
//! # Core Invariants
//!
//! 1. **No Silent Loss**: an accepted guaranteed command lives in exactly
//!    one of {queue, spool, in-flight} until it reaches a terminal response
//! 2. **Bounded Concurrency**: at most `max_concurrent` commands are in
//!    transmission at any instant
//! 3. **Gated Transmission**: a dispatch unit clears both the queue's
//!    admission throttle and the send throttle before transmission
//! 4. **Partition-Tolerant**: connection failures retry indefinitely;
//!    only reached-but-failed commands consume the retry budget
//!
//! # Architecture
//!
//! ```text
//! application -> CommandSender -> CommandQueue -> worker pool
//!                     |               ^              |
//!                     v (stopped /    |              v
//!              PersistentFifo --------+       SendThrottle gate
//!              (durable spool)   replay on start      |
//!                                                     v
//!                                            RemoteCommunicator
//! ```
//!
//! Global FIFO order is not preserved across the queue/spool boundary: a
//! guaranteed command that falls back to disk re-enters dispatch behind
//! commands that stayed in memory. This is an accepted trade-off.

pub mod communicator;
pub mod config;
pub mod error;
pub mod queue;
pub mod sender;
pub mod throttle;

#[cfg(test)]
mod tests;

pub use communicator::{FailureCallback, RemoteCommunicator};
pub use config::{CommandSenderConfig, ConfigCache};
pub use error::{DeliveryError, DeliveryResult};
pub use queue::CommandQueue;
pub use sender::{CommandSender, DispatchUnit, SenderState};
pub use throttle::SendThrottle;
