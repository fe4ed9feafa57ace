//! Workspace adapter: persona and memory files on disk.
//!
//! Persona files live under fixed names in the workspace root; memory
//! accumulates in per-day markdown files. Reads go through a snapshot
//! cached for up to 60 seconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use std::sync::Mutex;
use tracing::warn;

/// Fixed persona filenames in the workspace root.
pub const IDENTITY_FILE: &str = "IDENTITY.md";
pub const SOUL_FILE: &str = "SOUL.md";
pub const USER_FILE: &str = "USER.md";
pub const AGENTS_FILE: &str = "AGENTS.md";
pub const MEMORY_FILE: &str = "MEMORY.md";
pub const BOOTSTRAP_FILE: &str = "BOOTSTRAP.md";
pub const TOOLS_FILE: &str = "TOOLS.md";

/// Per-file soft limit before truncation, in characters.
const FILE_SOFT_LIMIT: usize = 8000;

/// Snapshot cache lifetime.
const SNAPSHOT_TTL: Duration = Duration::from_secs(60);

/// Loaded view of the workspace files.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceSnapshot {
    pub identity: String,
    pub soul: String,
    pub user: String,
    pub agents: String,
    pub memory: String,
    pub bootstrap: String,
    pub tool_notes: String,
    pub recent_daily: String,
    /// Filenames whose content was truncated at the soft limit.
    pub truncated: Vec<String>,
}

impl WorkspaceSnapshot {
    /// Bootstrap mode is active while BOOTSTRAP.md has content.
    pub fn bootstrap_active(&self) -> bool {
        !self.bootstrap.trim().is_empty()
    }
}

/// Filesystem adapter rooted at the workspace directory.
pub struct Workspace {
    root: PathBuf,
    cache: Mutex<Option<(Instant, WorkspaceSnapshot)>>,
}

impl Workspace {
    pub fn new(root: &Path) -> Self {
        let _ = fs::create_dir_all(root.join("memory"));
        Self {
            root: root.to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the per-day memory files.
    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    /// Load the workspace, served from cache when fresh.
    pub fn load(&self) -> WorkspaceSnapshot {
        {
            let cache = self.cache.lock().expect("workspace cache");
            if let Some((at, snapshot)) = cache.as_ref() {
                if at.elapsed() < SNAPSHOT_TTL {
                    return snapshot.clone();
                }
            }
        }

        let snapshot = self.load_uncached();
        *self.cache.lock().expect("workspace cache") = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Drop the cached snapshot (memory writes call this).
    pub fn invalidate(&self) {
        *self.cache.lock().expect("workspace cache") = None;
    }

    fn load_uncached(&self) -> WorkspaceSnapshot {
        let mut truncated = Vec::new();
        let mut read = |name: &str| -> String {
            let content = fs::read_to_string(self.root.join(name)).unwrap_or_default();
            if content.chars().count() > FILE_SOFT_LIMIT {
                truncated.push(name.to_string());
                content.chars().take(FILE_SOFT_LIMIT).collect()
            } else {
                content
            }
        };

        let identity = read(IDENTITY_FILE);
        let soul = read(SOUL_FILE);
        let user = read(USER_FILE);
        let agents = read(AGENTS_FILE);
        let memory = read(MEMORY_FILE);
        let bootstrap = read(BOOTSTRAP_FILE);
        let tool_notes = read(TOOLS_FILE);

        let daily_name = format!("memory/{}.md", Local::now().format("%Y-%m-%d"));
        let recent_daily = read(&daily_name);

        WorkspaceSnapshot {
            identity,
            soul,
            user,
            agents,
            memory,
            bootstrap,
            tool_notes,
            recent_daily,
            truncated,
        }
    }

    /// Append a categorized snippet to today's memory file under a
    /// timestamped heading.
    pub fn append_memory(&self, content: &str, category: &str) -> anyhow::Result<()> {
        let path = self
            .memory_dir()
            .join(format!("{}.md", Local::now().format("%Y-%m-%d")));
        let heading = format!(
            "\n## {} \n[{}] {}\n",
            Local::now().format("%H:%M"),
            category,
            content
        );

        let mut existing = fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(&heading);
        fs::write(&path, existing)?;
        self.invalidate();
        Ok(())
    }

    /// All memory documents as `(source, markdown)` pairs for reindexing:
    /// the long-term file plus every per-day file.
    pub fn memory_sources(&self) -> Vec<(String, String)> {
        let mut sources = Vec::new();

        let long_term = self.root.join(MEMORY_FILE);
        if let Ok(content) = fs::read_to_string(&long_term) {
            if !content.trim().is_empty() {
                sources.push(("MEMORY.md".to_string(), content));
            }
        }

        let daily_dir = self.memory_dir();
        let mut daily_files: Vec<PathBuf> = match fs::read_dir(&daily_dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
                .collect(),
            Err(e) => {
                warn!("Failed to read memory dir: {}", e);
                Vec::new()
            }
        };
        daily_files.sort();

        for path in daily_files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Ok(content) = fs::read_to_string(&path) {
                if !content.trim().is_empty() {
                    sources.push((format!("memory/{}", name), content));
                }
            }
        }
        sources
    }

    /// Stats line for the `/memory` command.
    pub fn memory_stats(&self) -> String {
        let sources = self.memory_sources();
        let total_chars: usize = sources.iter().map(|(_, c)| c.chars().count()).sum();
        format!(
            "{} memory files, {} characters",
            sources.len(),
            total_chars
        )
    }
}
