//! Wire types for the Messages API.
//!
//! Messages, content blocks, stop reasons, and model tiers are tagged
//! variants with exhaustive matching rather than ad-hoc JSON field probing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Model tiers
// ---------------------------------------------------------------------------

/// Model tier selectable per chat via `/model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    /// Canonical Anthropic model id for this tier.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelTier::Haiku => "claude-haiku-4-5-20251001",
            ModelTier::Sonnet => "claude-sonnet-4-5-20250929",
            ModelTier::Opus => "claude-opus-4-6",
        }
    }

    /// Per-tier output token cap.
    pub fn max_output_tokens(&self) -> u32 {
        match self {
            ModelTier::Haiku => 4096,
            ModelTier::Sonnet => 8192,
            ModelTier::Opus => 16384,
        }
    }

    /// Per-tier extended-thinking budget. Haiku runs without thinking.
    pub fn thinking_budget(&self) -> Option<u32> {
        match self {
            ModelTier::Haiku => None,
            ModelTier::Sonnet => Some(4096),
            ModelTier::Opus => Some(8192),
        }
    }

    /// Parse a user-supplied tier name ("haiku", "sonnet", "opus").
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "haiku" => Some(ModelTier::Haiku),
            "sonnet" => Some(ModelTier::Sonnet),
            "opus" => Some(ModelTier::Opus),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages and content blocks
// ---------------------------------------------------------------------------

/// Conversation role. Error replies are recorded as assistant turns so the
/// stored history keeps alternating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One content block of a message, in Messages API shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// A plain-text user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// A plain-text assistant message.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// First text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All text blocks joined with newlines; empty string when none.
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// True when the message carries anything beyond plain text blocks.
    pub fn is_multimodal(&self) -> bool {
        self.content
            .iter()
            .any(|b| !matches!(b, ContentBlock::Text { .. }))
    }

    /// Scalar text for persistence: plain text as-is, multimodal turns as an
    /// elided summary (only scalar text goes to the JSONL log).
    pub fn persistable_text(&self) -> String {
        if !self.is_multimodal() {
            return self.joined_text();
        }
        let mut parts: Vec<String> = Vec::new();
        for block in &self.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => parts.push(text.clone()),
                ContentBlock::Image { media_type, .. } => {
                    parts.push(format!("[image: {}]", media_type))
                }
                ContentBlock::ToolUse { name, .. } => parts.push(format!("[tool: {}]", name)),
                ContentBlock::ToolResult { .. } => parts.push("[tool result]".to_string()),
                _ => {}
            }
        }
        parts.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Tool definition sent with a request: name, description, JSON-schema input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One request to the Messages API.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub thinking_budget: Option<u32>,
}

impl ChatRequest {
    pub fn new(tier: ModelTier, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: tier.model_id().to_string(),
            max_tokens: tier.max_output_tokens(),
            system: None,
            messages,
            tools: Vec::new(),
            thinking_budget: tier.thinking_budget(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Disable extended thinking (the streaming path runs without it).
    pub fn without_thinking(mut self) -> Self {
        self.thinking_budget = None;
        self
    }
}

/// The final message of one model turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    /// Tool-use blocks in content order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// First text block of the response, or empty string.
    pub fn first_text(&self) -> String {
        self.content
            .iter()
            .find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Events surfaced by the streaming path.
#[derive(Debug)]
pub enum StreamEvent {
    /// Incremental text.
    TextDelta(String),
    /// Stream complete with the assembled final response.
    Done(ChatResponse),
    /// Stream failed. `streamed_any` tells whether text was already emitted.
    Error { message: String, streamed_any: bool },
}

/// Handle to a streaming response.
pub struct StreamHandle {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_parse() {
        assert_eq!(ModelTier::parse("opus"), Some(ModelTier::Opus));
        assert_eq!(ModelTier::parse(" Haiku "), Some(ModelTier::Haiku));
        assert_eq!(ModelTier::parse("gpt"), None);
    }

    #[test]
    fn test_tier_budgets() {
        assert!(ModelTier::Haiku.thinking_budget().is_none());
        assert!(ModelTier::Opus.thinking_budget().is_some());
        assert!(ModelTier::Opus.max_output_tokens() > ModelTier::Haiku.max_output_tokens());
    }

    #[test]
    fn test_content_block_serde_tagging() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".into(),
            name: "save_memory".into(),
            input: json!({"content": "likes tea"}),
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["name"], "save_memory");

        let back: ContentBlock = serde_json::from_value(v).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_first_text_skips_tool_blocks() {
        let resp = ChatResponse {
            content: vec![
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "x".into(),
                    input: json!({}),
                },
                ContentBlock::Text {
                    text: "after".into(),
                },
            ],
            stop_reason: StopReason::ToolUse,
        };
        assert_eq!(resp.first_text(), "after");
        assert_eq!(resp.tool_uses().len(), 1);
    }

    #[test]
    fn test_persistable_text_plain() {
        let msg = ChatMessage::user_text("hello");
        assert_eq!(msg.persistable_text(), "hello");
        assert!(!msg.is_multimodal());
    }

    #[test]
    fn test_persistable_text_elides_image() {
        let msg = ChatMessage {
            role: Role::User,
            content: vec![
                ContentBlock::Image {
                    media_type: "image/png".into(),
                    data: "aGk=".into(),
                },
                ContentBlock::Text {
                    text: "what is this?".into(),
                },
            ],
        };
        assert!(msg.is_multimodal());
        let text = msg.persistable_text();
        assert!(text.contains("[image: image/png]"));
        assert!(text.contains("what is this?"));
        assert!(!text.contains("aGk="));
    }

    #[test]
    fn test_request_builder() {
        let req = ChatRequest::new(ModelTier::Sonnet, vec![ChatMessage::user_text("hi")])
            .with_system("be brief")
            .without_thinking();
        assert_eq!(req.model, "claude-sonnet-4-5-20250929");
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert!(req.thinking_budget.is_none());
    }
}
