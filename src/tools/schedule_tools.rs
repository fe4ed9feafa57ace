//! Tools over the scheduler: reminders and recurring jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::base::{require_str, Tool};
use crate::scheduler::{JobPayload, Schedule, Scheduler};

fn describe_schedule(schedule: &Schedule) -> String {
    match schedule {
        Schedule::At { at_ms } => match DateTime::<Utc>::from_timestamp_millis(*at_ms) {
            Some(t) => format!("once at {}", t.format("%Y-%m-%d %H:%M UTC")),
            None => "once".to_string(),
        },
        Schedule::Every { interval_ms, .. } => format!("every {}s", interval_ms / 1000),
        Schedule::Cron { expr, tz } => match tz {
            Some(tz) => format!("cron '{}' ({})", expr, tz),
            None => format!("cron '{}'", expr),
        },
    }
}

/// Create a reminder or recurring job for the current chat.
pub struct ScheduleReminderTool {
    scheduler: Arc<Scheduler>,
}

impl ScheduleReminderTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ScheduleReminderTool {
    fn name(&self) -> &str {
        "schedule_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a reminder: once at a time (at_ms), repeating (every_seconds), or a cron expression."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "What to remind about"},
                "at_ms": {"type": "integer", "description": "Fire once at this epoch-ms time"},
                "every_seconds": {"type": "integer", "description": "Repeat interval in seconds"},
                "cron": {"type": "string", "description": "Five-field cron expression"},
                "timezone": {"type": "string", "description": "IANA timezone for cron (e.g. Asia/Seoul)"},
                "max_runs": {"type": "integer", "description": "Stop after this many fires"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, chat_id: i64, input: &Value) -> String {
        let message = match require_str(input, "message") {
            Ok(m) => m,
            Err(e) => return e,
        };

        let schedule = if let Some(at_ms) = input["at_ms"].as_i64() {
            Schedule::At { at_ms }
        } else if let Some(every) = input["every_seconds"].as_i64() {
            Schedule::Every {
                interval_ms: every * 1000,
                start_ms: None,
            }
        } else if let Some(expr) = input["cron"].as_str() {
            Schedule::Cron {
                expr: expr.to_string(),
                tz: input["timezone"].as_str().map(|s| s.to_string()),
            }
        } else {
            return "Error: provide one of at_ms, every_seconds, or cron".to_string();
        };

        let max_runs = input["max_runs"].as_u64().map(|n| n as u32);
        let payload = JobPayload::AgentTurn {
            message: message.to_string(),
        };

        match self
            .scheduler
            .add_job(chat_id, message, schedule, payload, max_runs)
            .await
        {
            Ok(job) => format!(
                "Scheduled '{}' ({}) — {}",
                job.name,
                job.id,
                describe_schedule(&job.schedule)
            ),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// List this chat's scheduled jobs.
pub struct ListRemindersTool {
    scheduler: Arc<Scheduler>,
}

impl ListRemindersTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for ListRemindersTool {
    fn name(&self) -> &str {
        "list_reminders"
    }

    fn description(&self) -> &str {
        "List scheduled reminders and jobs for this chat."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, chat_id: i64, _input: &Value) -> String {
        let jobs = self.scheduler.list_jobs(Some(chat_id)).await;
        if jobs.is_empty() {
            return "No reminders scheduled.".to_string();
        }
        jobs.iter()
            .map(|j| {
                let state = if j.enabled { "on" } else { "off" };
                format!(
                    "{} [{}] {} — {}",
                    j.id,
                    state,
                    j.name,
                    describe_schedule(&j.schedule)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cancel a scheduled job.
pub struct CancelReminderTool {
    scheduler: Arc<Scheduler>,
}

impl CancelReminderTool {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Tool for CancelReminderTool {
    fn name(&self) -> &str {
        "cancel_reminder"
    }

    fn description(&self) -> &str {
        "Cancel a scheduled reminder by job id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": {"type": "string", "description": "The job id to cancel"}
            },
            "required": ["job_id"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let job_id = match require_str(input, "job_id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        match self.scheduler.remove_job(job_id).await {
            Ok(()) => format!("Cancelled reminder {}", job_id),
            Err(e) => format!("Error: {}", e),
        }
    }
}
