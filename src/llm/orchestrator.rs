//! Turn orchestration: the tool-use loop and its streaming variant.
//!
//! A turn submits the message array, dispatches any tool-use blocks the
//! model returns (sequentially, in content order), feeds the results back,
//! and repeats until the model stops asking for tools or the iteration cap
//! is hit. The streaming variant emits text deltas and falls back to the
//! buffered loop whenever tools come into play.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::provider::LlmProvider;
use super::retry::with_retries;
use super::types::{ChatMessage, ChatRequest, ContentBlock, Role, StopReason, StreamEvent};
use crate::errors::ProviderError;

/// Hard cap on tool-use round trips within one turn.
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Returned verbatim when the cap is hit; no further provider call is made.
pub const TOOL_ITERATION_FALLBACK: &str =
    "I made too many tool calls in a row and had to stop — try breaking the request into smaller steps.";

/// Marker appended when a stream dies after text was already emitted.
pub const STREAM_ERROR_MARKER: &str = "(error during generation)";

/// Executes a named tool and returns its result text.
///
/// The `chat_id` is the explicit request scope: handlers that need session
/// state receive it here instead of reading ambient storage.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, chat_id: i64, name: &str, input: &Value) -> String;
}

/// Outcome of one orchestrated turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Final user-visible text.
    pub text: String,
    /// Whether any tool ran during the turn.
    pub used_tools: bool,
    /// Messages generated during the turn beyond the caller's input:
    /// assistant tool-use turns, tool-result turns, and the final assistant
    /// message, in order. Callers append these to history.
    pub transcript: Vec<ChatMessage>,
}

/// Drives LLM turns against a provider.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_iterations: MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Run a buffered turn to completion, including the tool loop.
    ///
    /// Cancellation is honored at retry boundaries: the token is checked
    /// before each provider submission, never mid-request.
    pub async fn run_turn(
        &self,
        chat_id: i64,
        request: ChatRequest,
        tools: &dyn ToolDispatcher,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnOutcome> {
        let mut request = request;
        let mut transcript: Vec<ChatMessage> = Vec::new();
        let mut used_tools = false;

        for iteration in 0..self.max_iterations {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(ProviderError::Cancelled.into());
                }
            }

            debug!("Turn iteration {}/{}", iteration + 1, self.max_iterations);
            let response = {
                let provider = self.provider.clone();
                let req = request.clone();
                with_retries(move || {
                    let provider = provider.clone();
                    let req = req.clone();
                    async move { provider.chat(req).await }
                })
                .await?
            };

            if response.stop_reason != StopReason::ToolUse {
                let text = response.first_text();
                let assistant = ChatMessage {
                    role: Role::Assistant,
                    content: response.content,
                };
                transcript.push(assistant);
                return Ok(TurnOutcome {
                    text,
                    used_tools,
                    transcript,
                });
            }

            used_tools = true;

            // Dispatch each tool-use block sequentially, order preserved.
            let mut results: Vec<ContentBlock> = Vec::new();
            for (id, name, input) in response.tool_uses() {
                debug!("Dispatching tool {} ({})", name, id);
                let output = tools.dispatch(chat_id, name, input).await;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: output,
                });
            }

            // Append the assistant block as-is and a user block of results.
            let assistant = ChatMessage {
                role: Role::Assistant,
                content: response.content,
            };
            let tool_reply = ChatMessage {
                role: Role::User,
                content: results,
            };
            transcript.push(assistant.clone());
            transcript.push(tool_reply.clone());
            request.messages.push(assistant);
            request.messages.push(tool_reply);
        }

        warn!("Tool loop exhausted after {} iterations", self.max_iterations);
        transcript.push(ChatMessage::assistant_text(TOOL_ITERATION_FALLBACK));
        Ok(TurnOutcome {
            text: TOOL_ITERATION_FALLBACK.to_string(),
            used_tools,
            transcript,
        })
    }

    /// Run a streaming turn.
    ///
    /// `on_delta` receives `(delta, accumulated)` for each text fragment.
    /// When the stream ends in tool use, the accumulation is discarded and
    /// the buffered loop runs to completion (`used_tools = true`). Errors
    /// before the first byte fall back to the buffered path; errors after
    /// streaming began return the partial text with a trailing marker.
    pub async fn run_turn_streaming(
        &self,
        chat_id: i64,
        request: ChatRequest,
        tools: &dyn ToolDispatcher,
        on_delta: &mut (dyn FnMut(&str, &str) + Send),
    ) -> Result<TurnOutcome> {
        // Streaming runs without extended thinking.
        let stream_request = request.clone().without_thinking();

        let mut handle = match self.provider.chat_stream(stream_request).await {
            Ok(h) => h,
            Err(e) => {
                debug!("Stream open failed ({}), falling back to buffered turn", e);
                return self.run_turn(chat_id, request, tools, None).await;
            }
        };

        let mut accumulated = String::new();

        while let Some(event) = handle.rx.recv().await {
            match event {
                StreamEvent::TextDelta(delta) => {
                    accumulated.push_str(&delta);
                    on_delta(&delta, &accumulated);
                }
                StreamEvent::Done(response) => {
                    if response.stop_reason == StopReason::ToolUse {
                        // The streamed text can't satisfy the tool loop on
                        // its own; rerun buffered from the original input.
                        debug!("Stream ended in tool_use, rerunning buffered");
                        let mut outcome = self.run_turn(chat_id, request, tools, None).await?;
                        outcome.used_tools = true;
                        return Ok(outcome);
                    }
                    let text = if accumulated.is_empty() {
                        response.first_text()
                    } else {
                        accumulated
                    };
                    let transcript = vec![ChatMessage::assistant_text(text.clone())];
                    return Ok(TurnOutcome {
                        text,
                        used_tools: false,
                        transcript,
                    });
                }
                StreamEvent::Error {
                    message,
                    streamed_any,
                } => {
                    if !streamed_any && accumulated.is_empty() {
                        debug!("Stream failed before first byte ({}), retrying buffered", message);
                        return self.run_turn(chat_id, request, tools, None).await;
                    }
                    warn!("Stream failed mid-generation: {}", message);
                    let text = format!("{} {}", accumulated.trim_end(), STREAM_ERROR_MARKER);
                    let transcript = vec![ChatMessage::assistant_text(text.clone())];
                    return Ok(TurnOutcome {
                        text,
                        used_tools: false,
                        transcript,
                    });
                }
            }
        }

        // Channel closed without Done: treat like a mid-stream failure.
        warn!("Stream channel closed without completion");
        if accumulated.is_empty() {
            return self.run_turn(chat_id, request, tools, None).await;
        }
        let text = format!("{} {}", accumulated.trim_end(), STREAM_ERROR_MARKER);
        let transcript = vec![ChatMessage::assistant_text(text.clone())];
        Ok(TurnOutcome {
            text,
            used_tools: false,
            transcript,
        })
    }
}
