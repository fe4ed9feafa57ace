//! Chat transport contract.
//!
//! The transport (Telegram or otherwise) lives outside the core; this trait
//! is its call surface. Message parsing, file download, and the command
//! registry are the transport's responsibility.

use anyhow::Result;
use async_trait::async_trait;

/// Identifier of a delivered message, used for later edits.
pub type MessageId = i64;

/// Outbound surface the runtime requires from a chat transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message; returns the delivered message id.
    async fn send(&self, chat_id: i64, text: &str) -> Result<MessageId>;

    /// Edit a previously sent message (streaming updates).
    async fn edit_message(&self, chat_id: i64, message_id: MessageId, text: &str) -> Result<()>;

    /// Delete a previously sent message.
    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> Result<()>;

    /// Show the typing indicator.
    async fn set_typing_indicator(&self, chat_id: i64) -> Result<()>;

    /// Resolve a transport file id to a fetchable location and size.
    async fn get_file(&self, file_id: &str) -> Result<(String, u64)>;
}

/// The command surface the transport registers with the channel.
pub const COMMAND_SURFACE: &[&str] = &[
    "start",
    "compact",
    "memory",
    "model",
    "reset",
    "confirm_reset",
    "reminders",
    "calendar",
    "setup",
    "weather_setup",
    "calendar_setup",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_surface_contains_core_commands() {
        for cmd in ["start", "compact", "model", "reset", "reminders"] {
            assert!(COMMAND_SURFACE.contains(&cmd), "missing {}", cmd);
        }
    }
}
