//! Message handling: the glue between transport events and the runtime.
//!
//! Messages within one chat are processed in arrival order behind a
//! per-chat lock; chats run concurrently. Each text turn pins detected
//! important context, expands up to three URLs (API-bound only), streams
//! the reply, persists both sides, and summarizes when the history grows.
//! Failures are classified into a friendly sentence and still recorded as
//! an assistant turn so the conversation stays well-formed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::events::{InboundEvent, InboundPayload, OutboundMessage};
use crate::config::schema::LimitsConfig;
use crate::errors::classify_turn_error;
use crate::health::HealthState;
use crate::llm::orchestrator::Orchestrator;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{
    ChatMessage, ChatRequest, ContentBlock, ModelTier, Role,
};
use crate::prompt::PromptAssembler;
use crate::scheduler::Scheduler;
use crate::session::{PinSource, SessionStore};
use crate::tools::{ToolRegistry, WebFetchTool};
use crate::workspace::Workspace;

/// Default caption for photos sent without one.
const DEFAULT_PHOTO_CAPTION: &str = "what's in this photo?";

/// Summarization instruction for the haiku-tier summarizer.
const SUMMARY_INSTRUCTION: &str = "Summarize this conversation segment concisely. \
Preserve names, stated preferences, decisions, and open tasks. Reply with the summary only.";

fn url_pattern() -> Regex {
    Regex::new(r#"https?://[^\s<>"')]+"#).expect("static regex")
}

/// Orchestrates inbound events end to end.
pub struct MessageHandler {
    sessions: Arc<SessionStore>,
    orchestrator: Orchestrator,
    summarizer: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    prompt: PromptAssembler,
    fetcher: Arc<WebFetchTool>,
    workspace: Arc<Workspace>,
    scheduler: Arc<Scheduler>,
    health: Arc<HealthState>,
    limits: LimitsConfig,
    chat_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    pending_resets: std::sync::Mutex<HashSet<i64>>,
    urls: Regex,
}

impl MessageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStore>,
        provider: Arc<dyn LlmProvider>,
        summarizer: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        scheduler: Arc<Scheduler>,
        fetcher: Arc<WebFetchTool>,
        health: Arc<HealthState>,
        limits: LimitsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            orchestrator: Orchestrator::new(provider)
                .with_max_iterations(limits.max_tool_iterations),
            summarizer,
            tools,
            prompt: PromptAssembler::new(workspace.clone()),
            fetcher,
            workspace,
            scheduler,
            health,
            limits,
            chat_locks: Mutex::new(HashMap::new()),
            pending_resets: std::sync::Mutex::new(HashSet::new()),
            urls: url_pattern(),
        })
    }

    async fn chat_lock(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handle any inbound event, returning the reply to deliver.
    pub async fn handle_event(
        &self,
        event: InboundEvent,
        on_delta: &mut (dyn FnMut(&str, &str) + Send),
    ) -> OutboundMessage {
        match event.payload {
            InboundPayload::Text { text } => self.handle_text(event.chat_id, &text, on_delta).await,
            InboundPayload::Photo {
                data,
                media_type,
                caption,
            } => {
                self.handle_photo(event.chat_id, data, &media_type, caption.as_deref())
                    .await
            }
            InboundPayload::Command { name, args } => {
                self.handle_command(event.chat_id, &name, &args).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Text turns
    // -----------------------------------------------------------------------

    pub async fn handle_text(
        &self,
        chat_id: i64,
        text: &str,
        on_delta: &mut (dyn FnMut(&str, &str) + Send),
    ) -> OutboundMessage {
        let lock = self.chat_lock(chat_id).await;
        let _guard = lock.lock().await;
        self.health.record_activity();

        // Auto-pin important phrases ("remember: ...", "내 이름은 ...").
        if let Some(phrase) = self.sessions.detect_important_context(text) {
            if self
                .sessions
                .pin_context(chat_id, &phrase, PinSource::Auto)
                .await
            {
                debug!("Auto-pinned context for chat {}", chat_id);
            }
        }

        // Expand up to N URLs in parallel. Bodies ride along to the API only.
        let url_bodies = self.fetch_urls(text).await;

        self.sessions
            .add_message(chat_id, ChatMessage::user_text(text))
            .await;

        let request = self.build_request(chat_id, &url_bodies).await;
        let outcome = self
            .orchestrator
            .run_turn_streaming(chat_id, request, self.tools.as_ref(), on_delta)
            .await;

        let reply = match outcome {
            Ok(outcome) => {
                for message in outcome.transcript {
                    self.sessions.add_message(chat_id, message).await;
                }
                outcome.text
            }
            Err(e) => self.record_failure(chat_id, &e).await,
        };

        // Summarize old history with the cheaper tier once it grows.
        let summarizer = self.summarizer.clone();
        self.sessions
            .smart_trim(chat_id, move |oldest| {
                summarize_messages(summarizer, oldest)
            })
            .await;

        OutboundMessage::new(chat_id, reply)
    }

    // -----------------------------------------------------------------------
    // Photo turns
    // -----------------------------------------------------------------------

    pub async fn handle_photo(
        &self,
        chat_id: i64,
        data: Vec<u8>,
        media_type: &str,
        caption: Option<&str>,
    ) -> OutboundMessage {
        let lock = self.chat_lock(chat_id).await;
        let _guard = lock.lock().await;
        self.health.record_activity();

        if data.len() > self.limits.max_image_bytes {
            return OutboundMessage::new(
                chat_id,
                format!(
                    "That photo is too large ({} MB) — I can handle up to {} MB.",
                    data.len() / (1024 * 1024),
                    self.limits.max_image_bytes / (1024 * 1024)
                ),
            );
        }

        let caption = caption.unwrap_or(DEFAULT_PHOTO_CAPTION).to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let user_message = ChatMessage {
            role: Role::User,
            content: vec![
                ContentBlock::Image {
                    media_type: media_type.to_string(),
                    data: encoded,
                },
                ContentBlock::Text {
                    text: caption.clone(),
                },
            ],
        };

        // History and the log keep a text surrogate of the multimodal turn;
        // the image bytes travel only in this turn's request.
        self.sessions
            .add_message(chat_id, user_message.clone())
            .await;

        let mut request = self.build_request(chat_id, &[]).await;
        // build_request already includes the surrogate history entry; swap
        // the final user message for the real multimodal one.
        request.messages.pop();
        request.messages.push(user_message);

        // Streaming is not used when the initial message has image blocks.
        let outcome = self
            .orchestrator
            .run_turn(chat_id, request, self.tools.as_ref(), None)
            .await;

        let reply = match outcome {
            Ok(outcome) => {
                for message in outcome.transcript {
                    self.sessions.add_message(chat_id, message).await;
                }
                outcome.text
            }
            Err(e) => self.record_failure(chat_id, &e).await,
        };

        OutboundMessage::new(chat_id, reply)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub async fn handle_command(&self, chat_id: i64, name: &str, args: &[String]) -> OutboundMessage {
        let lock = self.chat_lock(chat_id).await;
        let _guard = lock.lock().await;
        self.health.record_activity();

        let reply = match name {
            "start" => "Hi! I'm here — message me anything, send photos, or use \
                        /compact, /memory, /model, /reminders, /reset."
                .to_string(),
            "compact" => {
                let summarizer = self.summarizer.clone();
                let compacted = self
                    .sessions
                    .compact(chat_id, move |oldest| summarize_messages(summarizer, oldest))
                    .await;
                if compacted {
                    "Compacted the conversation — older messages are now summarized.".to_string()
                } else {
                    "Nothing to compact yet.".to_string()
                }
            }
            "memory" => self.workspace.memory_stats(),
            "model" => match args.first().map(|s| s.as_str()) {
                Some(name) => match ModelTier::parse(name) {
                    Some(tier) => {
                        self.sessions.set_model(chat_id, tier).await;
                        format!("Model set to {} ({})", name, tier.model_id())
                    }
                    None => "Unknown tier — choose haiku, sonnet, or opus.".to_string(),
                },
                None => {
                    let tier = self.sessions.model(chat_id).await;
                    format!("Current model: {}", tier.model_id())
                }
            },
            "reset" => {
                self.pending_resets
                    .lock()
                    .expect("reset set")
                    .insert(chat_id);
                "This wipes our conversation history and memory of this chat. \
                 Run /confirm_reset to proceed."
                    .to_string()
            }
            "confirm_reset" => {
                let pending = self
                    .pending_resets
                    .lock()
                    .expect("reset set")
                    .remove(&chat_id);
                if pending {
                    self.sessions.clear_session(chat_id).await;
                    info!("Chat {} reset", chat_id);
                    "Done — we're starting fresh.".to_string()
                } else {
                    "No reset pending. Run /reset first.".to_string()
                }
            }
            "reminders" => {
                let jobs = self.scheduler.list_jobs(Some(chat_id)).await;
                if jobs.is_empty() {
                    "No reminders scheduled.".to_string()
                } else {
                    jobs.iter()
                        .map(|j| format!("{} — {}", j.id, j.name))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            other => format!("Unknown command: /{}", other),
        };

        OutboundMessage::new(chat_id, reply)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fetch_urls(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let urls: Vec<String> = self
            .urls
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|u| seen.insert(u.clone()))
            .take(self.limits.max_urls_per_turn)
            .collect();
        if urls.is_empty() {
            return Vec::new();
        }

        let fetches = urls.iter().map(|url| {
            let fetcher = self.fetcher.clone();
            let url = url.clone();
            async move {
                match fetcher.fetch(&url).await {
                    Ok(body) => Some(format!("Content of {}:\n{}", url, body)),
                    Err(e) => {
                        warn!("URL expansion failed for {}: {}", url, e);
                        None
                    }
                }
            }
        });
        futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Assemble the API-bound request from the session's state. URL bodies
    /// are appended to the final user message here and nowhere else.
    async fn build_request(&self, chat_id: i64, url_bodies: &[String]) -> ChatRequest {
        let tier = self.sessions.model(chat_id).await;
        let session_context = self.sessions.build_context_for_prompt(chat_id).await;
        let tool_defs = self.tools.definitions();
        let tool_names: Vec<String> = tool_defs.iter().map(|d| d.name.clone()).collect();
        let system = self.prompt.build(tier, &session_context, &tool_names);

        let mut messages = self.sessions.history(chat_id).await;
        if !url_bodies.is_empty() {
            if let Some(last) = messages.last_mut() {
                last.content.push(ContentBlock::Text {
                    text: format!("\n[linked pages]\n{}", url_bodies.join("\n\n")),
                });
            }
        }

        ChatRequest::new(tier, messages)
            .with_system(system)
            .with_tools(tool_defs)
    }

    /// Classify a failed turn, record an `[error]` assistant turn so role
    /// alternation holds, and return the user-facing sentence.
    async fn record_failure(&self, chat_id: i64, error: &anyhow::Error) -> String {
        warn!("Turn failed for chat {}: {}", chat_id, error);
        self.health.record_error();
        let friendly = classify_turn_error(error).user_message().to_string();
        self.sessions
            .add_message(
                chat_id,
                ChatMessage::assistant_text(format!("[error] {}", friendly)),
            )
            .await;
        friendly
    }
}

/// Summarize a history slice with the haiku-tier provider.
async fn summarize_messages(
    provider: Arc<dyn LlmProvider>,
    oldest: Vec<ChatMessage>,
) -> anyhow::Result<String> {
    let dump: String = oldest
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.persistable_text()))
        .collect::<Vec<_>>()
        .join("\n");
    let request = ChatRequest::new(
        ModelTier::Haiku,
        vec![ChatMessage::user_text(format!(
            "{}\n\n{}",
            SUMMARY_INSTRUCTION, dump
        ))],
    );
    let response = provider.chat(request).await?;
    let text = response.first_text();
    if text.trim().is_empty() {
        anyhow::bail!("summarizer returned empty text");
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// Throttled streaming edits
// ---------------------------------------------------------------------------

/// Rate limiter for streaming message edits.
///
/// Transports cap edit frequency; this admits the first update immediately
/// and then at most one per interval. The final text is always flushed by
/// the caller via `send` after the turn completes.
pub struct EditThrottle {
    interval: Duration,
    last_edit: Option<Instant>,
}

impl EditThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_edit: None,
        }
    }

    /// Whether an edit may go out now; records the admission.
    pub fn admit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_edit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_edit = Some(now);
                true
            }
        }
    }
}
