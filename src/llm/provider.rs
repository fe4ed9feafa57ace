//! Base LLM provider interface.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, StreamEvent, StreamHandle};

/// Abstract interface to a Messages-API-shaped provider.
///
/// Implementations handle transport and wire format; callers work with the
/// typed request/response structures only.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a buffered chat request and wait for the final message.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Send a streaming chat request.
    ///
    /// Default implementation falls back to buffered [`chat`], emitting the
    /// whole text as one delta followed by `Done`.
    async fn chat_stream(&self, request: ChatRequest) -> Result<StreamHandle> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match self.chat(request).await {
            Ok(response) => {
                let text = response.first_text();
                if !text.is_empty() {
                    let _ = tx.send(StreamEvent::TextDelta(text));
                }
                let _ = tx.send(StreamEvent::Done(response));
            }
            Err(e) => {
                let _ = tx.send(StreamEvent::Error {
                    message: e.to_string(),
                    streamed_any: false,
                });
            }
        }
        Ok(StreamHandle { rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ChatMessage, ContentBlock, ModelTier, StopReason};

    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: vec![ContentBlock::Text { text: "hi".into() }],
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_falls_back_to_chat() {
        let provider = FixedProvider;
        let req = ChatRequest::new(ModelTier::Haiku, vec![ChatMessage::user_text("hello")]);
        let mut handle = provider.chat_stream(req).await.unwrap();

        let first = handle.rx.recv().await.unwrap();
        assert!(matches!(first, StreamEvent::TextDelta(ref t) if t == "hi"));
        let second = handle.rx.recv().await.unwrap();
        assert!(matches!(second, StreamEvent::Done(_)));
    }
}
