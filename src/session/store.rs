//! In-memory per-chat session state.
//!
//! Sessions are created lazily (hydrated from the JSONL tail), evicted by
//! idle TTL or LRU once the cap is reached, and trimmed against token
//! budgets. Pins survive history clears; summaries do not.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Local;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::log::MessageLog;
use crate::config::schema::LimitsConfig;
use crate::llm::types::{ChatMessage, ModelTier, Role};
use crate::tokens;

/// Who created a pin. Automatic pins are evicted before user pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinSource {
    Auto,
    User,
}

/// Short text injected into every system prompt for this chat.
#[derive(Debug, Clone)]
pub struct PinnedContext {
    pub text: String,
    pub created_at: String,
    pub source: PinSource,
}

/// Condensed representation of summarized-away history.
#[derive(Debug, Clone)]
pub struct SummaryChunk {
    pub summary: String,
    pub message_count: usize,
    pub start_time: String,
    pub end_time: String,
}

/// Per-chat conversation state.
pub struct Session {
    pub history: Vec<ChatMessage>,
    pub model: ModelTier,
    pub pinned: Vec<PinnedContext>,
    pub summaries: Vec<SummaryChunk>,
    last_accessed: Instant,
}

impl Session {
    fn new(model: ModelTier) -> Self {
        Self {
            history: Vec::new(),
            model,
            pinned: Vec::new(),
            summaries: Vec::new(),
            last_accessed: Instant::now(),
        }
    }
}

/// Patterns that mark a user phrase as worth pinning automatically.
fn important_context_patterns() -> Vec<Regex> {
    [
        r"(?i)remember[:,]?\s+(.+)",
        r"(?i)don't forget[:,]?\s+(.+)",
        r"(?i)my name is\s+(.+)",
        r"내\s*이름은\s*(.+)",
        r"기억해[줘요]*[:,]?\s*(.+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

/// Thread-safe map `chat_id → Session` plus the backing JSONL log.
pub struct SessionStore {
    sessions: Mutex<HashMap<i64, Session>>,
    log: MessageLog,
    limits: LimitsConfig,
    default_model: ModelTier,
    session_ttl: Duration,
    patterns: Vec<Regex>,
}

impl SessionStore {
    pub fn new(sessions_dir: &Path, limits: LimitsConfig, default_model: ModelTier) -> Self {
        let session_ttl = Duration::from_secs(limits.session_ttl_secs);
        Self {
            sessions: Mutex::new(HashMap::new()),
            log: MessageLog::new(sessions_dir),
            limits,
            default_model,
            session_ttl,
            patterns: important_context_patterns(),
        }
    }

    /// Access to the backing log (handler persists turn surrogates directly).
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Snapshot of the chat's history.
    pub async fn history(&self, chat_id: i64) -> Vec<ChatMessage> {
        let mut sessions = self.sessions.lock().await;
        let session = self.get_or_create(&mut sessions, chat_id);
        session.history.clone()
    }

    /// Append a message to history and persist its scalar text to the log.
    pub async fn add_message(&self, chat_id: i64, message: ChatMessage) {
        let role = message.role;
        let text = message.persistable_text();
        {
            let mut sessions = self.sessions.lock().await;
            let session = self.get_or_create(&mut sessions, chat_id);
            session.history.push(message);
        }
        self.log.append(chat_id, role, &text);
    }

    /// Append a message to history only (already persisted by the caller, or
    /// internal plumbing that should not reach the log).
    pub async fn add_message_unlogged(&self, chat_id: i64, message: ChatMessage) {
        let mut sessions = self.sessions.lock().await;
        let session = self.get_or_create(&mut sessions, chat_id);
        session.history.push(message);
    }

    /// Wipe in-memory history and summaries, preserving pins.
    pub async fn clear_history(&self, chat_id: i64) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&chat_id) {
            session.history.clear();
            session.summaries.clear();
            session.last_accessed = Instant::now();
        }
    }

    /// Remove the session entirely and delete its JSONL log.
    pub async fn clear_session(&self, chat_id: i64) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&chat_id);
        self.log.delete(chat_id);
    }

    /// Number of resident sessions (tests and the status command).
    pub async fn resident_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    // -----------------------------------------------------------------------
    // Model tier
    // -----------------------------------------------------------------------

    pub async fn model(&self, chat_id: i64) -> ModelTier {
        let mut sessions = self.sessions.lock().await;
        self.get_or_create(&mut sessions, chat_id).model
    }

    pub async fn set_model(&self, chat_id: i64, tier: ModelTier) {
        let mut sessions = self.sessions.lock().await;
        self.get_or_create(&mut sessions, chat_id).model = tier;
    }

    // -----------------------------------------------------------------------
    // Pinned context
    // -----------------------------------------------------------------------

    /// Pin text for this chat under the pinned-token budget.
    ///
    /// Evicts oldest `Auto` pins as needed; returns false (applying nothing)
    /// if the new pin would still exceed the budget after evicting them all.
    pub async fn pin_context(&self, chat_id: i64, text: &str, source: PinSource) -> bool {
        let new_tokens = tokens::estimate(text);
        if new_tokens > self.limits.max_pinned_tokens {
            return false;
        }

        let mut sessions = self.sessions.lock().await;
        let session = self.get_or_create(&mut sessions, chat_id);

        let pin_total = |pins: &[PinnedContext]| -> usize {
            pins.iter().map(|p| tokens::estimate(&p.text)).sum()
        };

        // Simulate eviction of auto pins (oldest first) before committing.
        let mut kept: Vec<PinnedContext> = session.pinned.clone();
        while pin_total(&kept) + new_tokens > self.limits.max_pinned_tokens {
            match kept.iter().position(|p| p.source == PinSource::Auto) {
                Some(idx) => {
                    kept.remove(idx);
                }
                None => return false,
            }
        }

        kept.push(PinnedContext {
            text: text.to_string(),
            created_at: Local::now().to_rfc3339(),
            source,
        });
        session.pinned = kept;
        true
    }

    pub async fn pins(&self, chat_id: i64) -> Vec<PinnedContext> {
        let mut sessions = self.sessions.lock().await;
        self.get_or_create(&mut sessions, chat_id).pinned.clone()
    }

    /// Match a user message against the important-context hints.
    ///
    /// Returns the captured phrase to pin, or None.
    pub fn detect_important_context(&self, user_message: &str) -> Option<String> {
        for pattern in &self.patterns {
            if let Some(caps) = pattern.captures(user_message) {
                if let Some(m) = caps.get(1) {
                    let phrase = m.as_str().trim();
                    if !phrase.is_empty() {
                        return Some(phrase.to_string());
                    }
                }
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Trimming and summarization
    // -----------------------------------------------------------------------

    /// Drop oldest messages while over the token budget and more than
    /// `min_recent_messages` remain.
    pub fn trim_by_tokens(&self, history: &mut Vec<ChatMessage>) {
        while tokens::estimate_messages(history) > self.limits.max_history_tokens
            && history.len() > self.limits.min_recent_messages
        {
            history.remove(0);
        }
    }

    /// Apply [`trim_by_tokens`] to the stored history.
    pub async fn trim(&self, chat_id: i64) {
        let mut sessions = self.sessions.lock().await;
        let limits_max = self.limits.max_history_tokens;
        let limits_min = self.limits.min_recent_messages;
        let session = self.get_or_create(&mut sessions, chat_id);
        while tokens::estimate_messages(&session.history) > limits_max
            && session.history.len() > limits_min
        {
            session.history.remove(0);
        }
    }

    /// Summarize away the oldest history once the summary threshold is hit.
    ///
    /// `summarize` receives the oldest messages and returns a summary string.
    /// On success the history becomes `[summary user turn, "acknowledged"
    /// assistant turn, ...recent]` and a summary chunk is recorded. On
    /// failure this falls back to token trimming. No lock is held across the
    /// summarizer call; per-chat serial handling keeps the swap consistent.
    pub async fn smart_trim<F, Fut>(&self, chat_id: i64, summarize: F) -> bool
    where
        F: FnOnce(Vec<ChatMessage>) -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        self.smart_trim_inner(chat_id, self.limits.summary_threshold_tokens, summarize)
            .await
    }

    /// `/compact`: summarize regardless of the threshold.
    pub async fn compact<F, Fut>(&self, chat_id: i64, summarize: F) -> bool
    where
        F: FnOnce(Vec<ChatMessage>) -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        self.smart_trim_inner(chat_id, 0, summarize).await
    }

    async fn smart_trim_inner<F, Fut>(
        &self,
        chat_id: i64,
        threshold_tokens: usize,
        summarize: F,
    ) -> bool
    where
        F: FnOnce(Vec<ChatMessage>) -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let (oldest, keep) = {
            let mut sessions = self.sessions.lock().await;
            let session = self.get_or_create(&mut sessions, chat_id);
            let total = tokens::estimate_messages(&session.history);
            if total <= threshold_tokens {
                return false;
            }
            let keep_count = self.limits.min_recent_messages.min(session.history.len());
            let split = session.history.len() - keep_count;
            if split == 0 {
                return false;
            }
            let oldest = session.history[..split].to_vec();
            let keep = session.history[split..].to_vec();
            (oldest, keep)
        };

        let message_count = oldest.len();
        let start_time = Local::now().to_rfc3339();

        match summarize(oldest).await {
            Ok(summary) => {
                let mut sessions = self.sessions.lock().await;
                let max_chunks = self.limits.max_summary_chunks;
                let session = self.get_or_create(&mut sessions, chat_id);

                let mut rebuilt = vec![
                    ChatMessage::user_text(format!(
                        "[previous-conversation summary]\n{}",
                        summary
                    )),
                    ChatMessage::assistant_text("acknowledged"),
                ];
                rebuilt.extend(keep);
                session.history = rebuilt;

                session.summaries.push(SummaryChunk {
                    summary,
                    message_count,
                    start_time,
                    end_time: Local::now().to_rfc3339(),
                });
                // Overflow merges pairwise from the oldest end.
                while session.summaries.len() > max_chunks {
                    let first = session.summaries.remove(0);
                    let second = &mut session.summaries[0];
                    second.summary = format!("{}\n{}", first.summary, second.summary);
                    second.message_count += first.message_count;
                    second.start_time = first.start_time;
                }
                debug!("Summarized {} messages for chat {}", message_count, chat_id);
                true
            }
            Err(e) => {
                warn!("Summarizer failed for chat {}: {}, trimming instead", chat_id, e);
                self.trim(chat_id).await;
                false
            }
        }
    }

    pub async fn summaries(&self, chat_id: i64) -> Vec<SummaryChunk> {
        let mut sessions = self.sessions.lock().await;
        self.get_or_create(&mut sessions, chat_id).summaries.clone()
    }

    /// Stable textual block of pins and summaries for the system prompt.
    pub async fn build_context_for_prompt(&self, chat_id: i64) -> String {
        let mut sessions = self.sessions.lock().await;
        let session = self.get_or_create(&mut sessions, chat_id);

        let mut parts: Vec<String> = Vec::new();
        if !session.pinned.is_empty() {
            let pins: Vec<String> = session
                .pinned
                .iter()
                .map(|p| format!("- {}", p.text))
                .collect();
            parts.push(format!("## Pinned Context\n{}", pins.join("\n")));
        }
        if !session.summaries.is_empty() {
            let chunks: Vec<String> = session
                .summaries
                .iter()
                .map(|c| format!("- ({} messages) {}", c.message_count, c.summary))
                .collect();
            parts.push(format!("## Earlier Conversation Summaries\n{}", chunks.join("\n")));
        }
        parts.join("\n\n")
    }

    // -----------------------------------------------------------------------
    // Internal: creation and eviction
    // -----------------------------------------------------------------------

    fn get_or_create<'a>(
        &self,
        sessions: &'a mut HashMap<i64, Session>,
        chat_id: i64,
    ) -> &'a mut Session {
        // Expire idle sessions first.
        let ttl = self.session_ttl;
        sessions.retain(|id, s| *id == chat_id || s.last_accessed.elapsed() < ttl);

        if !sessions.contains_key(&chat_id) {
            // LRU eviction at the cap.
            if sessions.len() >= self.limits.max_sessions {
                if let Some(&oldest) = sessions
                    .iter()
                    .min_by_key(|(_, s)| s.last_accessed)
                    .map(|(id, _)| id)
                {
                    debug!("Evicting LRU session {}", oldest);
                    sessions.remove(&oldest);
                }
            }

            let mut session = Session::new(self.default_model);
            // Hydrate from the JSONL tail.
            for entry in self.log.load_tail(chat_id, self.limits.max_history_load) {
                let message = match entry.role {
                    Role::User => ChatMessage::user_text(entry.content),
                    Role::Assistant => ChatMessage::assistant_text(entry.content),
                };
                session.history.push(message);
            }
            sessions.insert(chat_id, session);
        }

        let session = sessions.get_mut(&chat_id).expect("session just ensured");
        session.last_accessed = Instant::now();
        session
    }
}
