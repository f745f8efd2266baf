//! Session and meeting context for enriched prompts.
//!
//! The store is constructed explicitly and handed to the language stage —
//! no process-wide globals — with an in-memory cache in front of keyed,
//! TTL-bound persistence.

mod store;
mod types;

pub use store::{ContextPersistence, ContextStore, MemoryPersistence};
pub use types::{ConversationTurn, MeetingContext, SessionContext, MAX_HISTORY_TURNS};
