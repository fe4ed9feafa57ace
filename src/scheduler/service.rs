//! The scheduler service: one tick loop over all schedule kinds.
//!
//! Jobs fire at-least-once: execution is enqueued onto a bounded worker
//! pool, then the job is marked executed and its next run recomputed.
//! Missed ticks during downtime collapse to a single fire on restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::PersistentJobStore;
use super::types::{Job, JobPayload, JobStore, Schedule};
use crate::errors::ScheduleError;

/// Tick interval of the scheduler loop.
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Executes a fired job's payload.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> anyhow::Result<()>;
}

/// Manages scheduled jobs and the tick loop.
pub struct Scheduler {
    persist: PersistentJobStore,
    state: Mutex<JobStore>,
    executor: Arc<dyn JobExecutor>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    /// Load jobs from disk and recompute every `next_run` fresh.
    ///
    /// Recomputing on startup is the catch-up contract: an `every` job
    /// resumes at the next interval after now, a cron job fires once at its
    /// next match, and past `at` jobs are disabled rather than retro-fired.
    pub fn new(persist: PersistentJobStore, executor: Arc<dyn JobExecutor>, workers: usize) -> Self {
        let mut store = persist.load();
        let now = now_ms();
        for job in &mut store.jobs {
            job.next_run_ms = job.schedule.next_run_after(now);
            if job.next_run_ms.is_none() {
                job.enabled = false;
            }
        }
        if let Err(e) = persist.save(&store) {
            warn!("Failed to persist recovered job store: {}", e);
        }
        info!("Scheduler loaded {} jobs", store.jobs.len());

        Self {
            persist,
            state: Mutex::new(store),
            executor,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations (all persist the whole store atomically)
    // -----------------------------------------------------------------------

    /// Add a job. Fails when the schedule is invalid or can never fire.
    pub async fn add_job(
        &self,
        chat_id: i64,
        name: &str,
        schedule: Schedule,
        payload: JobPayload,
        max_runs: Option<u32>,
    ) -> Result<Job, ScheduleError> {
        schedule.validate()?;
        let now = now_ms();
        let next_run = schedule.next_run_after(now).ok_or_else(|| {
            ScheduleError::InvalidSchedule("schedule never fires".into())
        })?;

        let job = Job {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            chat_id,
            name: name.to_string(),
            schedule,
            payload,
            enabled: true,
            created_at_ms: now,
            last_run_ms: None,
            next_run_ms: Some(next_run),
            run_count: 0,
            max_runs,
        };

        let mut state = self.state.lock().await;
        state.jobs.push(job.clone());
        self.persist.save(&state)?;
        info!("Scheduler: added job '{}' ({})", job.name, job.id);
        Ok(job)
    }

    /// Remove a job by id.
    pub async fn remove_job(&self, job_id: &str) -> Result<(), ScheduleError> {
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|j| j.id != job_id);
        if state.jobs.len() == before {
            return Err(ScheduleError::NotFound(job_id.to_string()));
        }
        self.persist.save(&state)?;
        info!("Scheduler: removed job {}", job_id);
        Ok(())
    }

    /// Enable or disable a job.
    pub async fn enable_job(&self, job_id: &str, enabled: bool) -> Result<Job, ScheduleError> {
        let mut state = self.state.lock().await;
        let now = now_ms();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| ScheduleError::NotFound(job_id.to_string()))?;
        job.enabled = enabled;
        if enabled {
            job.next_run_ms = job.schedule.next_run_after(now);
        }
        let result = job.clone();
        self.persist.save(&state)?;
        Ok(result)
    }

    /// Snapshot of jobs, optionally filtered to one chat.
    pub async fn list_jobs(&self, chat_id: Option<i64>) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .jobs
            .iter()
            .filter(|j| chat_id.map(|c| j.chat_id == c).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Record a completed fire: bump `run_count`, set `last_run`, recompute
    /// `next_run`, and auto-disable exhausted jobs.
    async fn mark_executed(&self, job_id: &str, fired_at_ms: i64) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
            job.run_count += 1;
            job.last_run_ms = Some(fired_at_ms);
            job.next_run_ms = job.schedule.next_run_after(fired_at_ms);

            let exhausted = job.max_runs.map(|m| job.run_count >= m).unwrap_or(false);
            if exhausted || job.next_run_ms.is_none() {
                job.enabled = false;
                job.next_run_ms = None;
            }
        }
        if let Err(e) = self.persist.save(&state) {
            warn!("Failed to persist job store after execution: {}", e);
        }
    }

    // -----------------------------------------------------------------------
    // Tick loop
    // -----------------------------------------------------------------------

    /// Fire every enabled job due at `now`. Returns the number enqueued.
    pub async fn tick(self: &Arc<Self>, now: i64) -> usize {
        let due: Vec<Job> = {
            let state = self.state.lock().await;
            state
                .jobs
                .iter()
                .filter(|j| {
                    j.enabled && j.next_run_ms.map(|n| n <= now).unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for job in &due {
            debug!("Scheduler: firing job '{}' ({})", job.name, job.id);
            let executor = self.executor.clone();
            let workers = self.workers.clone();
            let fired = job.clone();
            tokio::spawn(async move {
                let _permit = workers.acquire_owned().await;
                if let Err(e) = executor.execute(&fired).await {
                    warn!("Job '{}' ({}) failed: {}", fired.name, fired.id, e);
                }
            });
            // At-least-once: marked executed after enqueue, not completion.
            self.mark_executed(&job.id, now).await;
        }
        due.len()
    }

    /// Run the minute tick loop until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Scheduler tick loop started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(now_ms()).await;
                }
                _ = shutdown.cancelled() => {
                    info!("Scheduler tick loop stopped");
                    return;
                }
            }
        }
    }
}
