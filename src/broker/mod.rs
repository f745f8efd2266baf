//! Stream-queue protocol over the broker.
//!
//! Stages never call each other directly; every hop goes through an
//! append-only stream with consumer-group semantics. The [`StreamBroker`]
//! trait is the full protocol a stage needs: group creation, blocking reads
//! of never-delivered entries, batch acknowledgment, pending-entry
//! inspection, and claiming of stale entries abandoned by dead consumers.

mod memory;
mod redis;
mod stream;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;
pub use stream::{PendingEntry, StreamBroker, StreamEntry, PAYLOAD_FIELD};
