//! Base trait for model-invocable tools.

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::types::ToolDefinition;

/// A capability the model can invoke with JSON arguments.
///
/// `execute` receives the current `chat_id` explicitly; the request scope
/// is threaded through the dispatcher rather than read from ambient state.
/// Handlers return plain text; failures are reported as strings beginning
/// with `Error:` so the model can decide how to proceed.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in tool-use blocks.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool input.
    fn input_schema(&self) -> Value;

    /// Execute with the given input.
    async fn execute(&self, chat_id: i64, input: &Value) -> String;

    /// Wire definition for a chat request.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Pull a required string argument, or produce the standard error message.
pub fn require_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, String> {
    input[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Error: '{}' parameter is required", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        async fn execute(&self, chat_id: i64, input: &Value) -> String {
            match require_str(input, "text") {
                Ok(text) => format!("{}:{}", chat_id, text),
                Err(e) => e,
            }
        }
    }

    #[test]
    fn test_definition_shape() {
        let def = EchoTool.definition();
        assert_eq!(def.name, "echo");
        assert_eq!(def.input_schema["type"], "object");
        assert!(def.input_schema["properties"]["text"].is_object());
    }

    #[tokio::test]
    async fn test_execute_receives_chat_scope() {
        let out = EchoTool.execute(42, &json!({"text": "hi"})).await;
        assert_eq!(out, "42:hi");
    }

    #[tokio::test]
    async fn test_missing_required_param() {
        let out = EchoTool.execute(1, &json!({})).await;
        assert_eq!(out, "Error: 'text' parameter is required");
    }

    #[test]
    fn test_require_str_rejects_empty() {
        assert!(require_str(&json!({"k": ""}), "k").is_err());
        assert_eq!(require_str(&json!({"k": "v"}), "k").unwrap(), "v");
    }
}
