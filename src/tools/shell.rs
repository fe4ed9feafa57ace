//! Command execution tool.
//!
//! Only a fixed allowlist of command names may run, arguments are rejected
//! on any shell metacharacter, and foreground runs are bounded by a
//! timeout. Background runs register a [`ProcessSession`] with a ring
//! buffer of output, killable including the whole process group.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::base::{require_str, Tool};

/// Commands the model may run.
const ALLOWED_COMMANDS: &[&str] = &[
    "git", "npm", "ls", "cat", "grep", "find", "echo", "pwd", "wc", "head", "tail", "date",
    "uname", "which", "du", "df", "sort", "uniq", "node", "python3",
];

/// Argument flags that are rejected outright.
const DENIED_FLAGS: &[&str] = &["--force", "-f", "--hard", "--delete", "-rf", "-fr", "--exec"];

/// Shell metacharacters that end the conversation immediately.
const METACHARACTERS: &[char] = &[';', '&', '|', '`', '\n', '\r', '>', '<'];

/// Ring buffer size for background output, in lines.
const RING_BUFFER_LINES: usize = 500;

/// Validate a command line into (program, args).
///
/// The program must be allowlisted by bare name; no metacharacters,
/// substitution, or denied flags anywhere in the input.
fn validate_command(raw: &str) -> Result<(String, Vec<String>), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Error: empty command".to_string());
    }

    if trimmed.chars().any(|c| METACHARACTERS.contains(&c)) {
        return Err("Error: command rejected (shell metacharacters are not allowed)".to_string());
    }
    if trimmed.contains("$(") || trimmed.contains("${") {
        return Err("Error: command rejected (substitution is not allowed)".to_string());
    }

    let mut parts = trimmed.split_whitespace();
    let program = parts.next().unwrap_or_default();
    if program.contains('/') || !ALLOWED_COMMANDS.contains(&program) {
        return Err(format!(
            "Error: command '{}' is not in the allowlist",
            program
        ));
    }

    let args: Vec<String> = parts.map(|s| s.to_string()).collect();
    for arg in &args {
        if DENIED_FLAGS.contains(&arg.as_str()) {
            return Err(format!("Error: argument '{}' is not allowed", arg));
        }
    }

    Ok((program.to_string(), args))
}

// ---------------------------------------------------------------------------
// Background process sessions
// ---------------------------------------------------------------------------

/// A background command with captured output.
pub struct ProcessSession {
    pub id: String,
    pub command: String,
    pub pid: Option<u32>,
    output: VecDeque<String>,
    pub finished: bool,
}

impl ProcessSession {
    fn push_line(&mut self, line: String) {
        if self.output.len() >= RING_BUFFER_LINES {
            self.output.pop_front();
        }
        self.output.push_back(line);
    }

    pub fn tail(&self, lines: usize) -> String {
        let skip = self.output.len().saturating_sub(lines);
        self.output
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Registry of live and recently finished background sessions.
#[derive(Default)]
pub struct ProcessRegistry {
    sessions: Mutex<HashMap<String, ProcessSession>>,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn list(&self) -> Vec<(String, String, bool)> {
        let sessions = self.sessions.lock().expect("process registry");
        sessions
            .values()
            .map(|s| (s.id.clone(), s.command.clone(), s.finished))
            .collect()
    }

    pub fn tail(&self, id: &str, lines: usize) -> Option<String> {
        let sessions = self.sessions.lock().expect("process registry");
        sessions
            .values()
            .find(|s| s.id.starts_with(id))
            .map(|s| s.tail(lines))
    }

    /// Kill a session by signalling its whole process group.
    pub fn kill(&self, id: &str) -> bool {
        let pid = {
            let sessions = self.sessions.lock().expect("process registry");
            sessions
                .values()
                .find(|s| s.id.starts_with(id) && !s.finished)
                .and_then(|s| s.pid)
        };
        match pid {
            Some(pid) => {
                // The child was started in its own process group, so the
                // negative pid reaches detached grandchildren too.
                let result = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
                debug!("Killed process group {} (rc={})", pid, result);
                result == 0
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// RunCommandTool
// ---------------------------------------------------------------------------

/// Execute an allowlisted command.
pub struct RunCommandTool {
    timeout: Duration,
    working_dir: std::path::PathBuf,
    registry: Arc<ProcessRegistry>,
}

impl RunCommandTool {
    pub fn new(
        timeout_secs: u64,
        working_dir: &std::path::Path,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            working_dir: working_dir.to_path_buf(),
            registry,
        }
    }

    async fn run_foreground(&self, program: &str, args: &[String]) -> String {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return format!("Error: failed to run command: {}", e),
            Err(_) => {
                return format!(
                    "Error: command timed out after {} seconds",
                    self.timeout.as_secs()
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("[stderr] ");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result.push_str(&format!("\n[exit status: {}]", output.status));
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }
        result
    }

    async fn run_background(&self, raw: &str, program: &str, args: &[String]) -> String {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return format!("Error: failed to spawn command: {}", e),
        };

        let id = Uuid::new_v4().to_string()[..8].to_string();
        let pid = child.id();
        {
            let mut sessions = self.registry.sessions.lock().expect("process registry");
            sessions.insert(
                id.clone(),
                ProcessSession {
                    id: id.clone(),
                    command: raw.to_string(),
                    pid,
                    output: VecDeque::new(),
                    finished: false,
                },
            );
        }

        let registry = self.registry.clone();
        let session_id = id.clone();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            let push = |line: String| {
                let mut sessions = registry.sessions.lock().expect("process registry");
                if let Some(session) = sessions.get_mut(&session_id) {
                    session.push_line(line);
                }
            };

            let out_task = async {
                if let Some(s) = stdout {
                    let mut lines = BufReader::new(s).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        push(line);
                    }
                }
            };
            let err_task = async {
                if let Some(s) = stderr {
                    let mut lines = BufReader::new(s).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        push(format!("[stderr] {}", line));
                    }
                }
            };

            let (_, _, status) = tokio::join!(out_task, err_task, child.wait());
            if let Err(e) = status {
                warn!("Background command wait failed: {}", e);
            }

            let mut sessions = registry.sessions.lock().expect("process registry");
            if let Some(session) = sessions.get_mut(&session_id) {
                session.finished = true;
            }
        });

        format!("Started background process {} (pid {:?})", id, pid)
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowlisted command (git, npm, ls, cat, ...). Set background=true for long-running commands."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command line to run"},
                "background": {"type": "boolean", "description": "Run detached and capture output"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let raw = match require_str(input, "command") {
            Ok(c) => c,
            Err(e) => return e,
        };
        let background = input["background"].as_bool().unwrap_or(false);

        let (program, args) = match validate_command(raw) {
            Ok(pair) => pair,
            Err(e) => return e,
        };

        if background {
            self.run_background(raw, &program, &args).await
        } else {
            self.run_foreground(&program, &args).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tool(dir: &TempDir) -> RunCommandTool {
        RunCommandTool::new(5, dir.path(), ProcessRegistry::new())
    }

    #[test]
    fn test_validate_allowlisted() {
        let (program, args) = validate_command("ls -la src").unwrap();
        assert_eq!(program, "ls");
        assert_eq!(args, vec!["-la", "src"]);
    }

    #[test]
    fn test_validate_rejects_unlisted() {
        assert!(validate_command("rm x").is_err());
        assert!(validate_command("curl http://x").is_err());
        assert!(validate_command("/bin/ls").is_err());
    }

    #[test]
    fn test_validate_rejects_metacharacters() {
        for bad in [
            "ls; rm x",
            "ls && echo hi",
            "ls | grep x",
            "echo `id`",
            "cat <file",
            "echo hi >out",
            "ls\nrm x",
        ] {
            assert!(validate_command(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_validate_rejects_substitution() {
        assert!(validate_command("echo $(id)").is_err());
        assert!(validate_command("echo ${HOME}").is_err());
    }

    #[test]
    fn test_validate_rejects_denied_flags() {
        assert!(validate_command("git push --force").is_err());
        assert!(validate_command("git reset --hard").is_err());
    }

    #[tokio::test]
    async fn test_run_echo() {
        let dir = TempDir::new().unwrap();
        let out = tool(&dir).execute(1, &json!({"command": "echo hello"})).await;
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_captures_exit_status() {
        let dir = TempDir::new().unwrap();
        let out = tool(&dir)
            .execute(1, &json!({"command": "cat definitely_missing_file"}))
            .await;
        assert!(out.contains("[stderr]"));
        assert!(out.contains("[exit status:"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = TempDir::new().unwrap();
        let tool = RunCommandTool::new(1, dir.path(), ProcessRegistry::new());
        // `find /` is allowlisted and slow enough to hit a 1s timeout in
        // most environments; tolerate fast completion.
        let out = tool
            .execute(1, &json!({"command": "find / -name zzz_does_not_exist"}))
            .await;
        assert!(out.contains("timed out") || !out.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_background_run_and_tail() {
        let dir = TempDir::new().unwrap();
        let registry = ProcessRegistry::new();
        let tool = RunCommandTool::new(5, dir.path(), registry.clone());

        let out = tool
            .execute(1, &json!({"command": "echo background-line", "background": true}))
            .await;
        assert!(out.starts_with("Started background process"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let sessions = registry.list();
        assert_eq!(sessions.len(), 1);
        let (id, command, _) = &sessions[0];
        assert!(command.contains("echo"));
        let tail = registry.tail(id, 10).unwrap();
        assert!(tail.contains("background-line"));
    }

    #[test]
    fn test_ring_buffer_caps_lines() {
        let mut session = ProcessSession {
            id: "x".into(),
            command: "test".into(),
            pid: None,
            output: VecDeque::new(),
            finished: false,
        };
        for i in 0..(RING_BUFFER_LINES + 100) {
            session.push_line(format!("line {}", i));
        }
        assert_eq!(session.output.len(), RING_BUFFER_LINES);
        assert!(session.tail(1).contains(&format!("line {}", RING_BUFFER_LINES + 99)));
    }

    #[test]
    fn test_kill_unknown_session() {
        let registry = ProcessRegistry::new();
        assert!(!registry.kill("nope"));
    }
}
