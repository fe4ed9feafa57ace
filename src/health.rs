//! Activity and error counters for the running service.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Process-wide health counters.
///
/// Plain atomics so any task can record without locking. Created once at the
/// composition root and passed down as a dependency.
#[derive(Debug, Default)]
pub struct HealthState {
    messages_handled: AtomicU64,
    turns_failed: AtomicU64,
    tool_calls: AtomicU64,
    agents_spawned: AtomicU64,
    jobs_fired: AtomicU64,
    last_activity_ms: AtomicI64,
    last_error_ms: AtomicI64,
    started_at_ms: AtomicI64,
}

impl HealthState {
    pub fn new() -> Self {
        let state = Self::default();
        state.started_at_ms.store(now_ms(), Ordering::Relaxed);
        state
    }

    /// Record an inbound message being handled.
    pub fn record_activity(&self) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Record a failed turn.
    pub fn record_error(&self) {
        self.turns_failed.fetch_add(1, Ordering::Relaxed);
        self.last_error_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent_spawn(&self) {
        self.agents_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_fired(&self) {
        self.jobs_fired.fetch_add(1, Ordering::Relaxed);
    }

    /// Milliseconds since the last handled message, or `None` before the first.
    pub fn idle_ms(&self) -> Option<i64> {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        if last == 0 {
            None
        } else {
            Some(now_ms() - last)
        }
    }

    /// Snapshot of all counters as JSON for `/start` and the status command.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "messagesHandled": self.messages_handled.load(Ordering::Relaxed),
            "turnsFailed": self.turns_failed.load(Ordering::Relaxed),
            "toolCalls": self.tool_calls.load(Ordering::Relaxed),
            "agentsSpawned": self.agents_spawned.load(Ordering::Relaxed),
            "jobsFired": self.jobs_fired.load(Ordering::Relaxed),
            "lastActivityMs": self.last_activity_ms.load(Ordering::Relaxed),
            "lastErrorMs": self.last_error_ms.load(Ordering::Relaxed),
            "startedAtMs": self.started_at_ms.load(Ordering::Relaxed),
        })
    }
}
