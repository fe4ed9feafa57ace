//! Tool registry and dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::base::Tool;
use crate::llm::orchestrator::ToolDispatcher;
use crate::llm::types::ToolDefinition;

/// Characters of tool output fed back to the model.
pub const MAX_TOOL_RESULT_CHARS: usize = 10_000;

/// Registry of model-invocable tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_chars: usize,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_chars: MAX_TOOL_RESULT_CHARS,
        }
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wire definitions for a chat request, sorted by name for stable order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name, truncating the result and catching panics so
    /// one bad tool cannot take down the turn loop.
    pub async fn execute(&self, chat_id: i64, name: &str, input: &Value) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => return format!("Error: unknown tool '{}'", name),
        };

        debug!("Executing tool {} for chat {}", name, chat_id);
        let fut = std::panic::AssertUnwindSafe(tool.execute(chat_id, input));
        let result = match futures_util::FutureExt::catch_unwind(fut).await {
            Ok(out) => out,
            Err(_) => format!("Error: tool '{}' panicked during execution", name),
        };

        truncate_result(&result, self.max_result_chars)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, chat_id: i64, name: &str, input: &Value) -> String {
        self.execute(chat_id, name, input).await
    }
}

fn truncate_result(result: &str, max_chars: usize) -> String {
    if result.chars().count() <= max_chars {
        return result.to_string();
    }
    let kept: String = result.chars().take(max_chars).collect();
    format!("{}\n...[truncated]", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedTool {
        tool_name: String,
        output: String,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            &self.tool_name
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _chat_id: i64, _input: &Value) -> String {
            self.output.clone()
        }
    }

    fn fixed(name: &str, output: &str) -> Box<FixedTool> {
        Box::new(FixedTool {
            tool_name: name.to_string(),
            output: output.to_string(),
        })
    }

    #[test]
    fn test_register_and_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(fixed("zeta", ""));
        registry.register(fixed("alpha", ""));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(fixed("dup", "a"));
        registry.register(fixed("dup", "b"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let out = registry.execute(1, "ghost", &json!({})).await;
        assert!(out.starts_with("Error: unknown tool"));
    }

    #[tokio::test]
    async fn test_execute_truncates_long_results() {
        let mut registry = ToolRegistry::new().with_max_result_chars(100);
        registry.register(fixed("big", &"x".repeat(500)));

        let out = registry.execute(1, "big", &json!({})).await;
        assert!(out.len() < 200);
        assert!(out.ends_with("...[truncated]"));
    }

    #[tokio::test]
    async fn test_execute_catches_panics() {
        struct PanickyTool;

        #[async_trait]
        impl Tool for PanickyTool {
            fn name(&self) -> &str {
                "panicky"
            }
            fn description(&self) -> &str {
                "boom"
            }
            fn input_schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _chat_id: i64, _input: &Value) -> String {
                panic!("tool bug")
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(PanickyTool));
        let out = registry.execute(1, "panicky", &json!({})).await;
        assert!(out.contains("panicked"));
    }

    #[tokio::test]
    async fn test_dispatcher_impl() {
        let mut registry = ToolRegistry::new();
        registry.register(fixed("t", "ok"));
        let dispatcher: &dyn ToolDispatcher = &registry;
        assert_eq!(dispatcher.dispatch(9, "t", &json!({})).await, "ok");
    }
}
