//! Memory tools: save, search, and pin.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_str, Tool};
use crate::memory::HybridEngine;
use crate::session::{PinSource, SessionStore};
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// SaveMemoryTool
// ---------------------------------------------------------------------------

/// Append a categorized note to today's memory file and mark the indexes
/// for rebuild.
pub struct SaveMemoryTool {
    workspace: Arc<Workspace>,
    engine: Arc<HybridEngine>,
}

impl SaveMemoryTool {
    pub fn new(workspace: Arc<Workspace>, engine: Arc<HybridEngine>) -> Self {
        Self { workspace, engine }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Save a memory about the user or conversation. Categories: preference, fact, event, task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "What to remember"},
                "category": {"type": "string", "description": "preference | fact | event | task"}
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let content = match require_str(input, "content") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let category = input["category"].as_str().unwrap_or("fact");

        if let Err(e) = self.workspace.append_memory(content, category) {
            return format!("Error: failed to save memory: {}", e);
        }
        let sources = self.workspace.memory_sources();
        if let Err(e) = self.engine.reindex_all(&sources).await {
            return format!("Saved, but reindex failed: {}", e);
        }
        format!("Saved [{}] {}", category, content)
    }
}

// ---------------------------------------------------------------------------
// SearchMemoryTool
// ---------------------------------------------------------------------------

/// Query the hybrid memory index.
pub struct SearchMemoryTool {
    engine: Arc<HybridEngine>,
    sessions: Arc<SessionStore>,
}

impl SearchMemoryTool {
    pub fn new(engine: Arc<HybridEngine>, sessions: Arc<SessionStore>) -> Self {
        Self { engine, sessions }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search saved memories by meaning and keywords."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, chat_id: i64, input: &Value) -> String {
        let query = match require_str(input, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };

        // Pinned context nudges ranking toward what the user marked important.
        let pins = self.sessions.pins(chat_id).await;
        let pin_text = pins
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let context = if pin_text.is_empty() {
            None
        } else {
            Some(pin_text.as_str())
        };

        match self.engine.query(query, 5, context).await {
            Ok(hits) if hits.is_empty() => format!("No memories found for: {}", query),
            Ok(hits) => hits
                .iter()
                .map(|h| format!("[{}] ({:.2}) {}", h.source, h.score, h.text))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: memory search failed: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// PinContextTool
// ---------------------------------------------------------------------------

/// Pin text into every future system prompt for this chat.
pub struct PinContextTool {
    sessions: Arc<SessionStore>,
}

impl PinContextTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for PinContextTool {
    fn name(&self) -> &str {
        "pin_context"
    }

    fn description(&self) -> &str {
        "Pin a short piece of context so it survives history trimming."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The text to pin"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, chat_id: i64, input: &Value) -> String {
        let text = match require_str(input, "text") {
            Ok(t) => t,
            Err(e) => return e,
        };
        if self.sessions.pin_context(chat_id, text, PinSource::User).await {
            format!("Pinned: {}", text)
        } else {
            "Error: pin budget exceeded; unpin or shorten the text".to_string()
        }
    }
}
