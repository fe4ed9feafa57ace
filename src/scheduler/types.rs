//! Scheduler entities: schedules, payloads, jobs, and the persisted store.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::cron::CronExpr;
use crate::errors::ScheduleError;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    /// Fires once at an absolute epoch-ms instant, then disables.
    #[serde(rename_all = "camelCase")]
    At { at_ms: i64 },
    /// Fires every `interval_ms`, anchored at `start_ms` (or creation time).
    #[serde(rename_all = "camelCase")]
    Every {
        interval_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_ms: Option<i64>,
    },
    /// Five-field cron expression evaluated in `tz` (UTC when absent).
    Cron {
        expr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl Schedule {
    /// Compute the next fire time strictly after `now_ms`.
    ///
    /// `None` means the job will never fire again: a past `At`, a cron with
    /// no match inside the two-year search window, or a malformed schedule.
    /// Missed fires collapse: `Every` resumes at the next interval boundary
    /// after now, past `At` jobs are dropped rather than retro-fired.
    pub fn next_run_after(&self, now_ms: i64) -> Option<i64> {
        match self {
            Schedule::At { at_ms } => {
                if *at_ms > now_ms {
                    Some(*at_ms)
                } else {
                    None
                }
            }
            Schedule::Every {
                interval_ms,
                start_ms,
            } => {
                if *interval_ms <= 0 {
                    return None;
                }
                let start = start_ms.unwrap_or(now_ms);
                if start > now_ms {
                    return Some(start);
                }
                let elapsed_intervals = (now_ms - start) / interval_ms;
                Some(start + (elapsed_intervals + 1) * interval_ms)
            }
            Schedule::Cron { expr, tz } => {
                let parsed = CronExpr::parse(expr).ok()?;
                let tz: Tz = tz
                    .as_deref()
                    .unwrap_or("UTC")
                    .parse()
                    .unwrap_or(chrono_tz::UTC);
                let after = DateTime::<Utc>::from_timestamp_millis(now_ms)?;
                parsed.next_run(after, tz).map(|t| t.timestamp_millis())
            }
        }
    }

    /// Validate the schedule at creation time.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::At { .. } => Ok(()),
            Schedule::Every { interval_ms, .. } => {
                if *interval_ms <= 0 {
                    Err(ScheduleError::InvalidSchedule(
                        "interval must be positive".into(),
                    ))
                } else {
                    Ok(())
                }
            }
            Schedule::Cron { expr, tz } => {
                CronExpr::parse(expr)?;
                if let Some(tz) = tz {
                    tz.parse::<Tz>().map_err(|_| {
                        ScheduleError::InvalidSchedule(format!("unknown timezone '{}'", tz))
                    })?;
                }
                Ok(())
            }
        }
    }
}

/// What runs when the job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Internal system event (daily briefing, heartbeat poll, reminder fire).
    SystemEvent { event: String },
    /// Synthesized user message posted into the chat's LLM pipeline.
    AgentTurn { message: String },
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub chat_id: i64,
    pub name: String,
    pub schedule: Schedule,
    pub payload: JobPayload,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_ms: Option<i64>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Persisted job store: a single versioned file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStore {
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

fn default_version() -> i32 {
    1
}

impl Default for JobStore {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}
