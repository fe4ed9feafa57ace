//! Configuration schema for companionbot.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the JSON config
//! file uses camelCase keys while Rust code uses snake_case fields. Every
//! resource limit of the runtime is surfaced here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Resource bounds for the conversational runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Maximum concurrently-resident sessions (LRU beyond this).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle seconds before a session is evicted.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// History token budget per session.
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
    /// Messages always kept when trimming.
    #[serde(default = "default_min_recent_messages")]
    pub min_recent_messages: usize,
    /// Token budget for pinned contexts.
    #[serde(default = "default_max_pinned_tokens")]
    pub max_pinned_tokens: usize,
    /// Token level that triggers summarization instead of plain trimming.
    #[serde(default = "default_summary_threshold_tokens")]
    pub summary_threshold_tokens: usize,
    /// Cap on stored summary chunks (overflow merges pairwise from oldest).
    #[serde(default = "default_max_summary_chunks")]
    pub max_summary_chunks: usize,
    /// JSONL entries tail-loaded when hydrating a session.
    #[serde(default = "default_max_history_load")]
    pub max_history_load: usize,
    /// Global cap on running background agents.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// Per-chat cap on running background agents.
    #[serde(default = "default_max_agents_per_chat")]
    pub max_agents_per_chat: usize,
    /// Tool round trips permitted inside one turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Characters of tool output fed back to the model.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    /// URLs fetched per inbound message.
    #[serde(default = "default_max_urls_per_turn")]
    pub max_urls_per_turn: usize,
    /// Largest accepted photo in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Scheduler worker pool size.
    #[serde(default = "default_scheduler_workers")]
    pub scheduler_workers: usize,
}

fn default_max_sessions() -> usize {
    100
}
fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_history_tokens() -> usize {
    50_000
}
fn default_min_recent_messages() -> usize {
    6
}
fn default_max_pinned_tokens() -> usize {
    4096
}
fn default_summary_threshold_tokens() -> usize {
    30_000
}
fn default_max_summary_chunks() -> usize {
    10
}
fn default_max_history_load() -> usize {
    50
}
fn default_max_concurrent_agents() -> usize {
    10
}
fn default_max_agents_per_chat() -> usize {
    3
}
fn default_max_tool_iterations() -> usize {
    10
}
fn default_max_tool_result_chars() -> usize {
    10_000
}
fn default_max_urls_per_turn() -> usize {
    3
}
fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_scheduler_workers() -> usize {
    4
}

impl Default for LimitsConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Workspace directory override. Defaults to `~/.companionbot`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Default model tier for new sessions ("haiku", "sonnet", "opus").
    #[serde(default = "default_model_tier")]
    pub default_model: String,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Foreground command timeout for the run_command tool, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Web fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Enable the heartbeat job on startup.
    #[serde(default)]
    pub heartbeat_enabled: bool,
    /// Local-time hour of the daily briefing (None disables it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_briefing_hour: Option<u8>,
    /// Chat that receives heartbeats and briefings.
    #[serde(default)]
    pub owner_chat_id: i64,
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

fn default_model_tier() -> String {
    "sonnet".to_string()
}
fn default_command_timeout_secs() -> u64 {
    30
}
fn default_fetch_timeout_secs() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_defaults() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.max_sessions, 100);
        assert_eq!(limits.max_concurrent_agents, 10);
        assert_eq!(limits.max_agents_per_chat, 3);
        assert_eq!(limits.max_tool_iterations, 10);
        assert_eq!(limits.max_tool_result_chars, 10_000);
        assert_eq!(limits.min_recent_messages, 6);
        assert_eq!(limits.max_pinned_tokens, 4096);
        assert_eq!(limits.max_urls_per_turn, 3);
        assert_eq!(limits.max_image_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_config_camel_case_keys() {
        let config = Config::default();
        let v = serde_json::to_value(&config).unwrap();
        assert!(v.get("defaultModel").is_some());
        assert!(v.get("default_model").is_none());
        assert!(v["limits"].get("maxSessions").is_some());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"defaultModel": "opus", "limits": {"maxSessions": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.default_model, "opus");
        assert_eq!(config.limits.max_sessions, 5);
        // Untouched fields fall back to defaults.
        assert_eq!(config.limits.max_agents_per_chat, 3);
        assert_eq!(config.command_timeout_secs, 30);
    }

    #[test]
    fn test_empty_json_is_valid() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_model, "sonnet");
        assert!(config.daily_briefing_hour.is_none());
    }
}
