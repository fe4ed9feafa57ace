//! LLM provider integration and turn orchestration.

pub mod anthropic;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use orchestrator::{Orchestrator, ToolDispatcher, TurnOutcome, MAX_TOOL_ITERATIONS};
pub use provider::LlmProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, ModelTier, Role, StopReason,
    StreamEvent, StreamHandle, ToolDefinition,
};
