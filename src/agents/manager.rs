//! Background agent lifecycle.
//!
//! Agents are fire-and-forget LLM tasks scoped to a chat. Admission is
//! capped globally and per chat; the oldest agent is evicted (cancelled if
//! still running) when the global cap is hit. Cancellation sets the status
//! before firing the abort signal so a finishing agent cannot race a stale
//! result past a cancel. A periodic sweep reaps stuck and expired agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::events::OutboundMessage;
use crate::errors::AgentError;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{ChatMessage, ChatRequest, ModelTier};

/// How long a finished agent lingers before the sweep purges it, and how
/// long a running agent may run before the sweep force-cancels it.
pub const AGENT_TTL_MS: i64 = 30 * 60 * 1000;

/// System prompt for background agents.
const AGENT_SYSTEM_PROMPT: &str = "You are a background task agent for a conversational companion. \
Complete the assigned task and reply with a concise result the companion can relay to its user. \
Do not address the user directly and do not ask follow-up questions.";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One background agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub task: String,
    pub chat_id: i64,
    pub status: AgentStatus,
    pub created_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
}

struct AgentEntry {
    record: AgentRecord,
    token: CancellationToken,
}

/// Owns all agents; only the manager mutates status.
pub struct AgentManager {
    provider: Arc<dyn LlmProvider>,
    tier: ModelTier,
    outbound: UnboundedSender<OutboundMessage>,
    agents: Mutex<HashMap<String, AgentEntry>>,
    max_concurrent: usize,
    max_per_chat: usize,
}

impl AgentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tier: ModelTier,
        outbound: UnboundedSender<OutboundMessage>,
        max_concurrent: usize,
        max_per_chat: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            tier,
            outbound,
            agents: Mutex::new(HashMap::new()),
            max_concurrent,
            max_per_chat,
        })
    }

    /// Spawn an agent for `chat_id`. Returns its id.
    ///
    /// Rejects with [`AgentError::QuotaExceeded`] when the chat already has
    /// the per-chat maximum running; evicts the oldest agent when the global
    /// cap is reached (per-chat rejection is checked first and never
    /// triggers global eviction).
    pub fn spawn(self: &Arc<Self>, task: &str, chat_id: i64) -> Result<String, AgentError> {
        let id = Uuid::new_v4().to_string()[..8].to_string();
        let token = CancellationToken::new();

        let evict_token = {
            let mut agents = self.agents.lock().expect("agent monitor");

            let running_for_chat = agents
                .values()
                .filter(|e| e.record.chat_id == chat_id && e.record.status == AgentStatus::Running)
                .count();
            if running_for_chat >= self.max_per_chat {
                return Err(AgentError::QuotaExceeded(running_for_chat));
            }

            // Global cap: evict the oldest entry, cancelling if running.
            let mut evict_token = None;
            if agents.len() >= self.max_concurrent {
                if let Some(oldest_id) = agents
                    .values()
                    .min_by_key(|e| e.record.created_at_ms)
                    .map(|e| e.record.id.clone())
                {
                    if let Some(mut entry) = agents.remove(&oldest_id) {
                        debug!("Evicting oldest agent {}", oldest_id);
                        if entry.record.status == AgentStatus::Running {
                            entry.record.status = AgentStatus::Cancelled;
                            evict_token = Some(entry.token.clone());
                        }
                    }
                }
            }

            agents.insert(
                id.clone(),
                AgentEntry {
                    record: AgentRecord {
                        id: id.clone(),
                        task: task.to_string(),
                        chat_id,
                        status: AgentStatus::Running,
                        created_at_ms: now_ms(),
                        completed_at_ms: None,
                        result: None,
                        error: None,
                    },
                    token: token.clone(),
                },
            );
            evict_token
        };
        // Abort signals fire outside the monitor.
        if let Some(token) = evict_token {
            token.cancel();
        }

        info!("Spawned agent {} for chat {}", id, chat_id);
        let manager = self.clone();
        let agent_id = id.clone();
        let task_text = task.to_string();
        tokio::spawn(async move {
            manager.run_agent(agent_id, chat_id, task_text, token).await;
        });

        Ok(id)
    }

    async fn run_agent(
        self: Arc<Self>,
        id: String,
        chat_id: i64,
        task: String,
        token: CancellationToken,
    ) {
        let request = ChatRequest::new(self.tier, vec![ChatMessage::user_text(task)])
            .with_system(AGENT_SYSTEM_PROMPT);

        let result = tokio::select! {
            r = self.provider.chat(request) => Some(r),
            _ = token.cancelled() => None,
        };

        let delivery = {
            let mut agents = self.agents.lock().expect("agent monitor");
            let entry = match agents.get_mut(&id) {
                Some(e) => e,
                None => return,
            };
            // A cancel that landed first wins; the late result is dropped.
            if entry.record.status != AgentStatus::Running {
                return;
            }
            entry.record.completed_at_ms = Some(now_ms());
            match result {
                Some(Ok(response)) => {
                    let text = response.first_text();
                    entry.record.status = AgentStatus::Completed;
                    entry.record.result = Some(text.clone());
                    Some(format!("[agent {}] done: {}", id, text))
                }
                Some(Err(e)) => {
                    warn!("Agent {} failed: {}", id, e);
                    entry.record.status = AgentStatus::Failed;
                    entry.record.error = Some(e.to_string());
                    Some(format!("[agent {}] failed: {}", id, e))
                }
                None => {
                    entry.record.status = AgentStatus::Cancelled;
                    None
                }
            }
        };

        if let Some(text) = delivery {
            let _ = self.outbound.send(OutboundMessage::new(chat_id, text));
        }
    }

    /// Cancel an agent by id (or unique id prefix).
    ///
    /// The status flips to `Cancelled` while holding the monitor; the abort
    /// signal fires after releasing it. Returns false for unknown ids and
    /// agents that already finished.
    pub fn cancel(&self, agent_id: &str) -> bool {
        let token = {
            let mut agents = self.agents.lock().expect("agent monitor");
            let key = agents
                .keys()
                .find(|k| k.starts_with(agent_id))
                .cloned();
            match key.and_then(|k| agents.get_mut(&k)) {
                Some(entry) if entry.record.status == AgentStatus::Running => {
                    entry.record.status = AgentStatus::Cancelled;
                    entry.record.completed_at_ms = Some(now_ms());
                    Some(entry.token.clone())
                }
                _ => None,
            }
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot an agent's record.
    pub fn get(&self, agent_id: &str) -> Result<AgentRecord, AgentError> {
        let agents = self.agents.lock().expect("agent monitor");
        agents
            .values()
            .find(|e| e.record.id.starts_with(agent_id))
            .map(|e| e.record.clone())
            .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))
    }

    /// Snapshot all agents, optionally filtered to one chat.
    pub fn list(&self, chat_id: Option<i64>) -> Vec<AgentRecord> {
        let agents = self.agents.lock().expect("agent monitor");
        let mut records: Vec<AgentRecord> = agents
            .values()
            .filter(|e| chat_id.map(|c| e.record.chat_id == c).unwrap_or(true))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at_ms);
        records
    }

    pub fn running_count(&self, chat_id: Option<i64>) -> usize {
        self.list(chat_id)
            .iter()
            .filter(|r| r.status == AgentStatus::Running)
            .count()
    }

    /// Reap stuck and expired agents as of `now`.
    ///
    /// Running agents older than the TTL are cancelled; finished agents past
    /// the TTL are purged.
    pub fn sweep_at(&self, now: i64) {
        let stale_tokens: Vec<CancellationToken> = {
            let mut agents = self.agents.lock().expect("agent monitor");

            let mut tokens = Vec::new();
            for entry in agents.values_mut() {
                if entry.record.status == AgentStatus::Running
                    && now - entry.record.created_at_ms > AGENT_TTL_MS
                {
                    warn!("Sweeping stuck agent {}", entry.record.id);
                    entry.record.status = AgentStatus::Cancelled;
                    entry.record.completed_at_ms = Some(now);
                    tokens.push(entry.token.clone());
                }
            }

            agents.retain(|_, e| match e.record.completed_at_ms {
                Some(done) => now - done <= AGENT_TTL_MS,
                None => true,
            });
            tokens
        };
        for token in stale_tokens {
            token.cancel();
        }
    }

    pub fn sweep(&self) {
        self.sweep_at(now_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatResponse, ContentBlock, StopReason};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Provider that waits for an external signal before answering.
    struct GatedProvider {
        gate: tokio::sync::Semaphore,
    }

    impl GatedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: tokio::sync::Semaphore::new(0),
            })
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    #[async_trait]
    impl LlmProvider for GatedProvider {
        async fn chat(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
            let permit = self.gate.acquire().await?;
            permit.forget();
            Ok(ChatResponse {
                content: vec![ContentBlock::Text {
                    text: "task done".into(),
                }],
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn manager_with(
        provider: Arc<dyn LlmProvider>,
    ) -> (
        Arc<AgentManager>,
        tokio::sync::mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = AgentManager::new(provider, ModelTier::Sonnet, tx, 10, 3);
        (manager, rx)
    }

    #[tokio::test]
    async fn test_spawn_and_complete_delivers_result() {
        let provider = GatedProvider::new();
        let (manager, mut rx) = manager_with(provider.clone());

        let id = manager.spawn("summarize notes", 42).unwrap();
        assert_eq!(id.len(), 8);
        assert_eq!(manager.running_count(Some(42)), 1);

        provider.release(1);
        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.chat_id, 42);
        assert!(delivered.text.contains("task done"));

        // Status settles to completed.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let record = manager.get(&id).unwrap();
        assert_eq!(record.status, AgentStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("task done"));
        assert!(record.completed_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_per_chat_cap_rejects_without_global_eviction() {
        let provider = GatedProvider::new();
        let (manager, _rx) = manager_with(provider.clone());

        for _ in 0..3 {
            manager.spawn("work", 42).unwrap();
        }
        let result = manager.spawn("one more", 42);
        assert!(matches!(result, Err(AgentError::QuotaExceeded(3))));
        // Nothing was evicted for the rejection.
        assert_eq!(manager.list(None).len(), 3);

        // A different chat still admits.
        assert!(manager.spawn("elsewhere", 7).is_ok());
    }

    #[tokio::test]
    async fn test_global_cap_evicts_oldest() {
        let provider = GatedProvider::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = AgentManager::new(provider.clone(), ModelTier::Sonnet, tx, 3, 2);

        let first = manager.spawn("a", 1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.spawn("b", 2).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.spawn("c", 3).unwrap();
        assert_eq!(manager.list(None).len(), 3);

        // Fourth spawn evicts the oldest (first).
        manager.spawn("d", 4).unwrap();
        assert_eq!(manager.list(None).len(), 3);
        assert!(matches!(manager.get(&first), Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_running_agent() {
        let provider = GatedProvider::new();
        let (manager, mut rx) = manager_with(provider.clone());

        let id = manager.spawn("slow task", 1).unwrap();
        assert!(manager.cancel(&id));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = manager.get(&id).unwrap();
        assert_eq!(record.status, AgentStatus::Cancelled);

        // No stale result is delivered even if the provider finishes later.
        provider.release(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_finished_returns_false() {
        let provider = GatedProvider::new();
        let (manager, mut rx) = manager_with(provider.clone());
        assert!(!manager.cancel("nope"));

        let id = manager.spawn("quick", 1).unwrap();
        provider.release(1);
        let _ = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.cancel(&id));
    }

    #[tokio::test]
    async fn test_cancel_by_prefix() {
        let provider = GatedProvider::new();
        let (manager, _rx) = manager_with(provider.clone());
        let id = manager.spawn("task", 1).unwrap();
        assert!(manager.cancel(&id[..4]));
    }

    #[tokio::test]
    async fn test_sweep_cancels_stuck_and_purges_expired() {
        let provider = GatedProvider::new();
        let (manager, mut rx) = manager_with(provider.clone());

        // One finishes now, one stays running.
        let done = manager.spawn("finishes", 1).unwrap();
        let stuck = manager.spawn("hangs", 2).unwrap();
        provider.release(1);
        let _ = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Within TTL nothing changes.
        manager.sweep_at(now_ms() + AGENT_TTL_MS / 2);
        assert_eq!(manager.list(None).len(), 2);

        // Past TTL: the stuck agent is cancelled, the finished one purged.
        manager.sweep_at(now_ms() + AGENT_TTL_MS + 1000);
        let remaining = manager.list(None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, stuck);
        assert_eq!(remaining[0].status, AgentStatus::Cancelled);
        let _ = done;
    }

    #[tokio::test]
    async fn test_failed_agent_reports_error() {
        struct FailingProvider;

        #[async_trait]
        impl LlmProvider for FailingProvider {
            async fn chat(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
                anyhow::bail!("model unavailable")
            }
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let manager = AgentManager::new(Arc::new(FailingProvider), ModelTier::Sonnet, tx, 10, 3);

        let id = manager.spawn("doomed", 9).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(delivered.text.contains("failed"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let record = manager.get(&id).unwrap();
        assert_eq!(record.status, AgentStatus::Failed);
        assert!(record.error.is_some());
    }
}
