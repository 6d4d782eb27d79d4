//! Crash-safe on-disk FIFO spool for guaranteed command delivery.
//!
//! [`PersistentFifo`] stores opaque byte or JSON object records in a single
//! size-bounded backing file, in strict write order. It backs the
//! at-least-once guarantee of the command sender: records put here survive
//! process restarts and are replayed once a sender drains them.
//!
//! # Core Invariants
//!
//! 1. **FIFO**: records are taken in exactly the order they were put
//! 2. **Self-Describing**: record boundaries and consumed/unread state live
//!    in the file, so a fresh instance opened on an existing file reports
//!    the correct `count()`
//! 3. **Bounded**: the backing file never exceeds its configured maximum
//!    size; compaction discards the oldest records to make room and the
//!    caller can observe that a purge happened
//! 4. **Torn-Tail Safe**: a partially written trailing record is detected
//!    and cut off on open, never counted as data
//!
//! # Record wire format
//!
//! All records use little-endian byte order:
//!
//! ```text
//! [4: total_len][1: state][1: flags][2: reserved][4: payload_len][N: payload]
//! ```
//!
//! `total_len` excludes its own prefix. Consuming a record rewrites the
//! `state` byte in place; compaction rewrites the whole file through a
//! temporary file and an atomic rename.

mod error;
mod fifo;
mod record;

pub use error::{SpoolError, SpoolResult};
pub use fifo::{PersistentFifo, PutOutcome, SpoolConfig};
pub use record::{
    SpoolRecord, RECORD_FLAG_COMPRESSED, RECORD_STATE_CONSUMED, RECORD_STATE_UNREAD,
};
