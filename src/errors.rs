//! Domain error types for companionbot.
//!
//! Typed errors at module boundaries replace string-encoded errors and
//! enable structured handling via pattern matching.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Errors from LLM provider operations.
///
/// Embedded in `anyhow::Error` so the `LlmProvider` trait signature
/// (`-> anyhow::Result<ChatResponse>`) stays unchanged while callers
/// can downcast: `e.downcast_ref::<ProviderError>()`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Failed to parse response JSON: {0}")]
    JsonParse(String),

    #[error("Rate limited (status {status}): retry after {retry_after_ms:?}ms")]
    RateLimited {
        status: u16,
        retry_after_ms: Option<u64>,
    },

    #[error("Authentication failed (status {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Context too long: {0}")]
    ContextTooLong(String),

    #[error("Invalid request (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// True for errors the retry wrapper recovers locally (429 and 5xx).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Server { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Errors from the background agent manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Agent quota exceeded: {0} agents already running for this chat")]
    QuotaExceeded(usize),

    #[error("Agent not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

/// Errors from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Failed to persist job store: {0}")]
    Persistence(String),
}

// ---------------------------------------------------------------------------
// Turn failure classification
// ---------------------------------------------------------------------------

/// User-facing classification of an orchestration failure.
///
/// Produced by [`classify_turn_error`] at the message-handler boundary;
/// each variant maps to a short friendly sentence with an actionable hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFailure {
    RateLimited,
    Timeout,
    ContextTooLong,
    Other,
}

impl TurnFailure {
    /// The user-visible sentence for this failure. Never leaks internals.
    pub fn user_message(&self) -> &'static str {
        match self {
            TurnFailure::RateLimited => {
                "I'm being rate-limited right now. Give me a minute and try again."
            }
            TurnFailure::Timeout => "That took too long and timed out. Try again in a moment.",
            TurnFailure::ContextTooLong => {
                "This conversation has grown too long for me to process — run /compact to summarize it."
            }
            TurnFailure::Other => "Something went wrong on my side. Try again in a moment.",
        }
    }
}

/// Classify an orchestration error for user-facing reporting.
pub fn classify_turn_error(err: &anyhow::Error) -> TurnFailure {
    if let Some(pe) = err.downcast_ref::<ProviderError>() {
        return match pe {
            ProviderError::RateLimited { .. } => TurnFailure::RateLimited,
            ProviderError::ContextTooLong(_) => TurnFailure::ContextTooLong,
            _ => TurnFailure::Other,
        };
    }

    let msg = err.to_string().to_lowercase();
    if msg.contains("timed out") || msg.contains("timeout") {
        TurnFailure::Timeout
    } else if msg.contains("rate limit") || msg.contains("429") {
        TurnFailure::RateLimited
    } else if msg.contains("too long") || msg.contains("context length") {
        TurnFailure::ContextTooLong
    } else {
        TurnFailure::Other
    }
}
