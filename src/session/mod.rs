//! Per-chat conversation state: JSONL persistence and the in-memory store.

pub mod log;
pub mod store;

pub use log::{LogEntry, MessageLog};
pub use store::{PinSource, PinnedContext, SessionStore, SummaryChunk};
