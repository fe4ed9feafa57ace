//! Command-line entry points and the composition root.
//!
//! `run` wires the three singletons (session store, agent manager,
//! scheduler) together as plain dependencies and drives a line-based chat
//! on stdin; a real chat transport attaches through the library's
//! [`crate::bus::ChatTransport`] contract instead. Exit codes: 0 normal,
//! 1 misconfiguration.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::AgentManager;
use crate::bus::events::OutboundMessage;
use crate::config;
use crate::handler::MessageHandler;
use crate::health::HealthState;
use crate::llm::{AnthropicProvider, LlmProvider, ModelTier};
use crate::memory::{HashingEmbedder, HybridEngine, FTS_INDEX_FILENAME};
use crate::scheduler::{
    Job, JobExecutor, JobPayload, PersistentJobStore, Scheduler, JOB_STORE_FILENAME,
};
use crate::secrets;
use crate::session::SessionStore;
use crate::tools::{
    CancelAgentTool, CancelReminderTool, EditFileTool, ListAgentsTool, ListDirTool,
    ListRemindersTool, PathGuard, PinContextTool, ProcessRegistry, ReadFileTool, RunCommandTool,
    SaveMemoryTool, ScheduleReminderTool, SearchMemoryTool, SpawnAgentTool, ToolRegistry,
    WebFetchTool, WebSearchTool, WriteFileTool,
};
use crate::workspace::Workspace;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "companionbot", about = "Conversational companion service", version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the companion (stdin chat; transports attach via the library).
    Run,
    /// Show runtime configuration and store status.
    Status,
}

/// Parse arguments and dispatch. Returns the process exit code.
pub async fn main() -> i32 {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run => run().await,
        Commands::Status => status(),
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    }
}

fn status() -> Result<()> {
    let data = config::data_dir();
    let config = config::load_config(&data);
    println!("data dir: {}", data.display());
    println!("default model: {}", config.default_model);
    println!(
        "anthropic key: {}",
        if secrets::get(secrets::ANTHROPIC_API_KEY).is_some() {
            "configured"
        } else {
            "missing"
        }
    );
    let jobs = PersistentJobStore::new(&data.join(JOB_STORE_FILENAME)).load();
    println!("scheduled jobs: {}", jobs.jobs.len());
    Ok(())
}

/// Scheduler executor that forwards fired jobs into the runtime loop.
struct ChannelExecutor {
    tx: tokio::sync::mpsc::UnboundedSender<Job>,
}

#[async_trait]
impl JobExecutor for ChannelExecutor {
    async fn execute(&self, job: &Job) -> Result<()> {
        self.tx
            .send(job.clone())
            .map_err(|e| anyhow::anyhow!("job channel closed: {}", e))
    }
}

/// Create the heartbeat and daily-briefing jobs when enabled and absent.
async fn ensure_builtin_jobs(scheduler: &Arc<Scheduler>, cfg: &crate::config::Config) {
    let existing = scheduler.list_jobs(Some(cfg.owner_chat_id)).await;

    if cfg.heartbeat_enabled && !existing.iter().any(|j| j.name == "heartbeat") {
        let result = scheduler
            .add_job(
                cfg.owner_chat_id,
                "heartbeat",
                crate::scheduler::Schedule::Every {
                    interval_ms: 30 * 60 * 1000,
                    start_ms: None,
                },
                JobPayload::SystemEvent {
                    event: "heartbeat".into(),
                },
                None,
            )
            .await;
        if let Err(e) = result {
            warn!("Failed to create heartbeat job: {}", e);
        }
    }

    if let Some(hour) = cfg.daily_briefing_hour {
        if !existing.iter().any(|j| j.name == "daily briefing") {
            let result = scheduler
                .add_job(
                    cfg.owner_chat_id,
                    "daily briefing",
                    crate::scheduler::Schedule::Cron {
                        expr: format!("0 {} * * *", hour.min(23)),
                        tz: None,
                    },
                    JobPayload::AgentTurn {
                        message: "Give me a short morning briefing: today's date, any \
                                  reminders coming up, and anything notable from memory."
                            .into(),
                    },
                    None,
                )
                .await;
            if let Err(e) = result {
                warn!("Failed to create daily briefing job: {}", e);
            }
        }
    }
}

async fn run() -> Result<()> {
    let data = config::data_dir();
    let cfg = config::load_config(&data);
    let workspace_root = cfg.workspace.clone().unwrap_or_else(|| data.clone());

    let api_key = secrets::get(secrets::ANTHROPIC_API_KEY)
        .context("anthropic-api-key is not configured (set ANTHROPIC_API_KEY)")?;
    let default_model =
        ModelTier::parse(&cfg.default_model).context("defaultModel must be haiku|sonnet|opus")?;

    let provider: Arc<dyn LlmProvider> = Arc::new(AnthropicProvider::new(&api_key));
    let health = Arc::new(HealthState::new());
    let sessions = Arc::new(SessionStore::new(
        &config::sessions_dir(&data),
        cfg.limits.clone(),
        default_model,
    ));
    let workspace = Arc::new(Workspace::new(&workspace_root));

    // Hybrid memory over the workspace files; warm the keyword index now,
    // the vector cache fills on first query.
    let engine = Arc::new(HybridEngine::new(
        &workspace.memory_dir().join(FTS_INDEX_FILENAME),
        Arc::new(HashingEmbedder::default()),
    )?);
    let indexed = engine.reindex_all(&workspace.memory_sources()).await?;
    info!("Memory index ready ({} chunks)", indexed);

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let agents = AgentManager::new(
        provider.clone(),
        default_model,
        outbound_tx.clone(),
        cfg.limits.max_concurrent_agents,
        cfg.limits.max_agents_per_chat,
    );

    let (job_tx, mut job_rx) = tokio::sync::mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(
        PersistentJobStore::new(&data.join(JOB_STORE_FILENAME)),
        Arc::new(ChannelExecutor { tx: job_tx }),
        cfg.limits.scheduler_workers,
    ));
    ensure_builtin_jobs(&scheduler, &cfg).await;

    // Tool registry. File and command access stays inside the workspace.
    let guard = Arc::new(PathGuard::new(&workspace_root));
    let processes = ProcessRegistry::new();
    let fetcher = Arc::new(WebFetchTool::new(4000, cfg.fetch_timeout_secs));
    let mut tools = ToolRegistry::new().with_max_result_chars(cfg.limits.max_tool_result_chars);
    tools.register(Box::new(ReadFileTool::new(guard.clone())));
    tools.register(Box::new(WriteFileTool::new(guard.clone())));
    tools.register(Box::new(EditFileTool::new(guard.clone())));
    tools.register(Box::new(ListDirTool::new(guard)));
    tools.register(Box::new(RunCommandTool::new(
        cfg.command_timeout_secs,
        &workspace_root,
        processes,
    )));
    tools.register(Box::new(WebFetchTool::new(4000, cfg.fetch_timeout_secs)));
    tools.register(Box::new(WebSearchTool::new(
        secrets::get(secrets::BRAVE_API_KEY),
        5,
    )));
    tools.register(Box::new(SaveMemoryTool::new(
        workspace.clone(),
        engine.clone(),
    )));
    tools.register(Box::new(SearchMemoryTool::new(
        engine.clone(),
        sessions.clone(),
    )));
    tools.register(Box::new(PinContextTool::new(sessions.clone())));
    tools.register(Box::new(SpawnAgentTool::new(agents.clone())));
    tools.register(Box::new(ListAgentsTool::new(agents.clone())));
    tools.register(Box::new(CancelAgentTool::new(agents.clone())));
    tools.register(Box::new(ScheduleReminderTool::new(scheduler.clone())));
    tools.register(Box::new(ListRemindersTool::new(scheduler.clone())));
    tools.register(Box::new(CancelReminderTool::new(scheduler.clone())));

    let handler = MessageHandler::new(
        sessions,
        provider.clone(),
        provider,
        Arc::new(tools),
        workspace,
        scheduler.clone(),
        fetcher,
        health.clone(),
        cfg.limits.clone(),
    );

    let shutdown = CancellationToken::new();

    // Scheduler tick loop.
    tokio::spawn(scheduler.clone().run(shutdown.clone()));

    // Agent sweep every five minutes.
    {
        let agents = agents.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => agents.sweep(),
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    // Fired jobs feed back into the chat pipeline.
    {
        let handler = handler.clone();
        let outbound = outbound_tx.clone();
        let health = health.clone();
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                health.record_job_fired();
                match &job.payload {
                    JobPayload::AgentTurn { message } => {
                        let mut sink = |_: &str, _: &str| {};
                        let reply = handler.handle_text(job.chat_id, message, &mut sink).await;
                        let _ = outbound.send(reply);
                    }
                    JobPayload::SystemEvent { event } => {
                        let _ = outbound.send(OutboundMessage::new(
                            job.chat_id,
                            format!("⏰ {}", event),
                        ));
                    }
                }
            }
        });
    }

    // Deliver outbound messages (agent results, job fires) to the terminal.
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            println!("\n[chat {}] {}", message.chat_id, message.text);
        }
    });

    // Line-based chat on stdin for chat id 0.
    info!("companionbot ready — type a message, /command, or ctrl-d to quit");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let mut parts = command.split_whitespace();
            let name = parts.next().unwrap_or_default().to_string();
            let args: Vec<String> = parts.map(|s| s.to_string()).collect();
            let reply = handler.handle_command(0, &name, &args).await;
            println!("{}", reply.text);
            continue;
        }

        let mut streamed = String::new();
        let mut on_delta = |delta: &str, accumulated: &str| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
            streamed = accumulated.to_string();
        };
        let reply = handler.handle_text(0, &line, &mut on_delta).await;
        if !streamed.is_empty() {
            println!();
        }
        // Tool-use and error paths produce text that was never streamed.
        if reply.text != streamed {
            println!("{}", reply.text);
        }
    }

    shutdown.cancel();
    if let Err(e) = std::io::stdout().flush() {
        warn!("stdout flush failed: {}", e);
    }
    Ok(())
}
