//! Event types exchanged between the transport and the runtime.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Inbound payload from the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundPayload {
    /// Plain text message.
    Text { text: String },
    /// Photo with raw bytes and an optional caption.
    Photo {
        data: Vec<u8>,
        media_type: String,
        caption: Option<String>,
    },
    /// Bot command (`/compact`, `/model opus`, ...), already split by the
    /// transport's command registry.
    Command { name: String, args: Vec<String> },
}

/// A message received from a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub payload: InboundPayload,
    #[serde(default = "now")]
    pub timestamp: DateTime<Local>,
}

fn now() -> DateTime<Local> {
    Local::now()
}

impl InboundEvent {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            payload: InboundPayload::Text { text: text.into() },
            timestamp: Local::now(),
        }
    }

    pub fn command(chat_id: i64, name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            chat_id,
            payload: InboundPayload::Command {
                name: name.into(),
                args,
            },
            timestamp: Local::now(),
        }
    }
}

/// A message to deliver to a chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}
