//! Background sub-agents scoped to a chat.

pub mod manager;

pub use manager::{AgentManager, AgentRecord, AgentStatus, AGENT_TTL_MS};
