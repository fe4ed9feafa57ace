//! Native Anthropic Messages API provider.
//!
//! Speaks `POST /v1/messages` directly with typed content blocks, both
//! buffered and streaming (SSE). HTTP failures are classified into
//! [`ProviderError`] so the retry wrapper can honor `Retry-After`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::provider::LlmProvider;
use super::types::{
    ChatRequest, ChatResponse, ContentBlock, StopReason, StreamEvent, StreamHandle,
};
use crate::errors::ProviderError;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider that talks to the Anthropic Messages API.
pub struct AnthropicProvider {
    api_key: String,
    api_base: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: ANTHROPIC_API_BASE.to_string(),
            client: Client::new(),
        }
    }

    /// Point the provider at a different base URL (tests, proxies).
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn build_body(request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "content": content_to_wire(&m.content),
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        if let Some(ref system) = request.system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }
        if let Some(budget) = request.thinking_budget {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.api_base);
        self.client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()).into())
    }
}

/// Serialize content blocks to the wire, collapsing a lone text block to the
/// scalar string form the API also accepts.
fn content_to_wire(blocks: &[ContentBlock]) -> Value {
    if let [ContentBlock::Text { text }] = blocks {
        return json!(text);
    }
    let wire: Vec<Value> = blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::Image { media_type, data } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }),
            ContentBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => json!({
                "type": "tool_result", "tool_use_id": tool_use_id, "content": content,
            }),
        })
        .collect();
    Value::Array(wire)
}

fn parse_stop_reason(s: &str) -> StopReason {
    match s {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Parse the content array of a final message into typed blocks.
fn parse_content(data: &Value) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if let Some(content) = data["content"].as_array() {
        for block in content {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        blocks.push(ContentBlock::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("tool_use") => {
                    blocks.push(ContentBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        input: block["input"].clone(),
                    });
                }
                // Thinking blocks are internal; they never reach callers.
                _ => {}
            }
        }
    }
    blocks
}

fn parse_response(data: &Value) -> ChatResponse {
    let stop_reason = parse_stop_reason(data["stop_reason"].as_str().unwrap_or("end_turn"));
    ChatResponse {
        content: parse_content(data),
        stop_reason,
    }
}

/// Parse a `Retry-After` header value: either delay-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<u64> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(secs * 1000);
    }
    if let Ok(when) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let delta = when.signed_duration_since(chrono::Utc::now());
        return Some(delta.num_milliseconds().max(0) as u64);
    }
    None
}

/// Classify a non-success HTTP response.
fn classify_http_error(status: u16, retry_after: Option<u64>, body: &str) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            status,
            retry_after_ms: retry_after,
        },
        401 | 403 => ProviderError::Auth {
            status,
            message: body.to_string(),
        },
        400 if body.contains("prompt is too long") || body.contains("context") => {
            ProviderError::ContextTooLong(body.to_string())
        }
        400..=499 => ProviderError::InvalidRequest {
            status,
            message: body.to_string(),
        },
        _ => ProviderError::Server {
            status,
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        debug!(
            "AnthropicProvider::chat model={} messages={} tools={}",
            request.model,
            request.messages.len(),
            request.tools.len()
        );

        let body = Self::build_body(&request, false);
        let response = self.post(&body).await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            warn!("Anthropic API returned {}: {}", status, text);
            return Err(classify_http_error(status, retry_after, &text).into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::JsonParse(e.to_string()))
            .context("Failed to parse Anthropic API response")?;

        Ok(parse_response(&data))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<StreamHandle> {
        debug!(
            "AnthropicProvider::chat_stream model={} messages={}",
            request.model,
            request.messages.len()
        );

        let body = Self::build_body(&request, true);
        let response = self.post(&body).await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            warn!("Anthropic streaming API returned {}: {}", status, text);
            return Err(classify_http_error(status, retry_after, &text).into());
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            parse_sse(byte_stream, tx).await;
        });

        Ok(StreamHandle { rx })
    }
}

// ---------------------------------------------------------------------------
// SSE stream parsing
// ---------------------------------------------------------------------------

/// Parse Anthropic SSE events into [`StreamEvent`]s.
///
/// Events: `message_start`, `content_block_start`, `content_block_delta`
/// (`text_delta` / `input_json_delta`), `content_block_stop`, `message_delta`
/// (stop_reason), `message_stop`.
async fn parse_sse(
    byte_stream: impl futures_util::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
        + Unpin,
    tx: tokio::sync::mpsc::UnboundedSender<StreamEvent>,
) {
    let mut line_buffer = String::new();
    let mut text_blocks: Vec<String> = Vec::new();
    // index → (id, name, accumulated input JSON)
    let mut tool_blocks: std::collections::BTreeMap<u64, (String, String, String)> =
        std::collections::BTreeMap::new();
    let mut block_order: Vec<(u64, bool)> = Vec::new(); // (index, is_tool)
    let mut current_index: u64 = 0;
    let mut stop_reason = StopReason::EndTurn;
    let mut streamed_any = false;

    let mut stream = Box::pin(byte_stream);

    while let Some(result) = stream.next().await {
        let bytes = match result {
            Ok(b) => b,
            Err(e) => {
                warn!("Anthropic SSE stream error: {}", e);
                let _ = tx.send(StreamEvent::Error {
                    message: e.to_string(),
                    streamed_any,
                });
                return;
            }
        };

        line_buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline_pos) = line_buffer.find('\n') {
            let line = line_buffer[..newline_pos].trim_end_matches('\r').to_string();
            line_buffer = line_buffer[newline_pos + 1..].to_string();

            let data_str = match line.strip_prefix("data: ") {
                Some(d) => d,
                None => continue,
            };
            let data: Value = match serde_json::from_str(data_str) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match data["type"].as_str().unwrap_or("") {
                "content_block_start" => {
                    current_index = data["index"].as_u64().unwrap_or(current_index);
                    let block = &data["content_block"];
                    if block["type"].as_str() == Some("tool_use") {
                        tool_blocks.insert(
                            current_index,
                            (
                                block["id"].as_str().unwrap_or("").to_string(),
                                block["name"].as_str().unwrap_or("").to_string(),
                                String::new(),
                            ),
                        );
                        block_order.push((current_index, true));
                    } else {
                        while text_blocks.len() <= current_index as usize {
                            text_blocks.push(String::new());
                        }
                        block_order.push((current_index, false));
                    }
                }
                "content_block_delta" => {
                    let delta = &data["delta"];
                    match delta["type"].as_str().unwrap_or("") {
                        "text_delta" => {
                            if let Some(text) = delta["text"].as_str() {
                                while text_blocks.len() <= current_index as usize {
                                    text_blocks.push(String::new());
                                }
                                text_blocks[current_index as usize].push_str(text);
                                streamed_any = true;
                                let _ = tx.send(StreamEvent::TextDelta(text.to_string()));
                            }
                        }
                        "input_json_delta" => {
                            if let Some(partial) = delta["partial_json"].as_str() {
                                if let Some(entry) = tool_blocks.get_mut(&current_index) {
                                    entry.2.push_str(partial);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                "message_delta" => {
                    if let Some(sr) = data["delta"]["stop_reason"].as_str() {
                        stop_reason = parse_stop_reason(sr);
                    }
                }
                "message_stop" => {
                    let response =
                        assemble_streamed(&text_blocks, &mut tool_blocks, &block_order, stop_reason);
                    let _ = tx.send(StreamEvent::Done(response));
                    return;
                }
                _ => {}
            }
        }
    }

    // Stream ended without message_stop; emit what we have.
    let response = assemble_streamed(&text_blocks, &mut tool_blocks, &block_order, stop_reason);
    let _ = tx.send(StreamEvent::Done(response));
}

fn assemble_streamed(
    text_blocks: &[String],
    tool_blocks: &mut std::collections::BTreeMap<u64, (String, String, String)>,
    block_order: &[(u64, bool)],
    stop_reason: StopReason,
) -> ChatResponse {
    let mut content = Vec::new();
    for &(index, is_tool) in block_order {
        if is_tool {
            if let Some((id, name, input_str)) = tool_blocks.remove(&index) {
                let input: Value = serde_json::from_str(&input_str).unwrap_or(json!({}));
                content.push(ContentBlock::ToolUse { id, name, input });
            }
        } else if let Some(text) = text_blocks.get(index as usize) {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text: text.clone() });
            }
        }
    }
    ChatResponse {
        content,
        stop_reason,
    }
}
