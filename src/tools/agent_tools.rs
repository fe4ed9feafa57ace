//! Tools over the background agent manager.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_str, Tool};
use crate::agents::{AgentManager, AgentStatus};

/// Spawn a background agent for the current chat.
pub struct SpawnAgentTool {
    agents: Arc<AgentManager>,
}

impl SpawnAgentTool {
    pub fn new(agents: Arc<AgentManager>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn a background agent to work on a task. Its result is announced to this chat when done."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "The task to work on"}
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, chat_id: i64, input: &Value) -> String {
        let task = match require_str(input, "task") {
            Ok(t) => t,
            Err(e) => return e,
        };
        match self.agents.spawn(task, chat_id) {
            Ok(id) => format!("Agent {} spawned; it will report back here.", id),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// List this chat's agents.
pub struct ListAgentsTool {
    agents: Arc<AgentManager>,
}

impl ListAgentsTool {
    pub fn new(agents: Arc<AgentManager>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Tool for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List background agents for this chat and their status."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, chat_id: i64, _input: &Value) -> String {
        let records = self.agents.list(Some(chat_id));
        if records.is_empty() {
            return "No agents for this chat.".to_string();
        }
        records
            .iter()
            .map(|r| {
                let status = match r.status {
                    AgentStatus::Running => "running",
                    AgentStatus::Completed => "completed",
                    AgentStatus::Failed => "failed",
                    AgentStatus::Cancelled => "cancelled",
                };
                format!("{} [{}] {}", r.id, status, r.task)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cancel a running agent.
pub struct CancelAgentTool {
    agents: Arc<AgentManager>,
}

impl CancelAgentTool {
    pub fn new(agents: Arc<AgentManager>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Tool for CancelAgentTool {
    fn name(&self) -> &str {
        "cancel_agent"
    }

    fn description(&self) -> &str {
        "Cancel a running background agent by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {"type": "string", "description": "Agent id (or prefix)"}
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let agent_id = match require_str(input, "agent_id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        if self.agents.cancel(agent_id) {
            format!("Cancelled agent {}", agent_id)
        } else {
            format!("Error: no running agent matching '{}'", agent_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::LlmProvider;
    use crate::llm::types::{ChatRequest, ChatResponse, ContentBlock, ModelTier, StopReason};

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        async fn chat(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(ChatResponse {
                content: vec![ContentBlock::Text { text: "ok".into() }],
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn manager() -> Arc<AgentManager> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        AgentManager::new(Arc::new(SlowProvider), ModelTier::Sonnet, tx, 10, 3)
    }

    #[tokio::test]
    async fn test_spawn_list_cancel_flow() {
        let agents = manager();
        let spawn = SpawnAgentTool::new(agents.clone());
        let list = ListAgentsTool::new(agents.clone());
        let cancel = CancelAgentTool::new(agents.clone());

        let out = spawn
            .execute(42, &json!({"task": "collect notes"}))
            .await;
        assert!(out.contains("spawned"));

        let listing = list.execute(42, &json!({})).await;
        assert!(listing.contains("running"));
        assert!(listing.contains("collect notes"));

        let id = listing.split_whitespace().next().unwrap().to_string();
        let out = cancel.execute(42, &json!({"agent_id": id})).await;
        assert!(out.starts_with("Cancelled"));
    }

    #[tokio::test]
    async fn test_spawn_quota_error_message() {
        let agents = manager();
        let spawn = SpawnAgentTool::new(agents.clone());
        for _ in 0..3 {
            spawn.execute(1, &json!({"task": "t"})).await;
        }
        let out = spawn.execute(1, &json!({"task": "one too many"})).await;
        assert!(out.starts_with("Error:"));
        assert!(out.contains("quota"));
    }

    #[tokio::test]
    async fn test_list_empty() {
        let agents = manager();
        let list = ListAgentsTool::new(agents);
        assert_eq!(list.execute(5, &json!({})).await, "No agents for this chat.");
    }
}
