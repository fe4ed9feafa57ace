//! Persistent append log: one JSONL file per chat.
//!
//! Each line is `{"role","content","timestamp"}`. Appends are best-effort;
//! the in-memory session stays authoritative for the current turn, so I/O
//! errors are logged and swallowed. One corrupt line forfeits only itself.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::types::Role;

/// One persisted log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// JSONL message log keyed by chat id.
pub struct MessageLog {
    sessions_dir: PathBuf,
}

impl MessageLog {
    pub fn new(sessions_dir: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
        }
    }

    fn path_for(&self, chat_id: i64) -> PathBuf {
        self.sessions_dir.join(format!("{}.jsonl", chat_id))
    }

    /// Append one entry. Errors are logged and swallowed; no fsync.
    pub fn append(&self, chat_id: i64, role: Role, content: &str) {
        let entry = LogEntry {
            role,
            content: content.to_string(),
            timestamp: Local::now().to_rfc3339(),
        };
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to serialize log entry for chat {}: {}", chat_id, e);
                return;
            }
        };

        if let Err(e) = fs::create_dir_all(&self.sessions_dir) {
            warn!("Failed to create sessions dir: {}", e);
            return;
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(chat_id))
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            warn!("Failed to append to session log {}: {}", chat_id, e);
        }
    }

    /// Load the last `limit` entries (all when `limit` is 0), skipping
    /// malformed lines with a warning.
    pub fn load_tail(&self, chat_id: i64, limit: usize) -> Vec<LogEntry> {
        let path = self.path_for(chat_id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut entries: Vec<LogEntry> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("Failed to read session log {}: {}", chat_id, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping bad JSONL line in chat {}: {}", chat_id, e),
            }
        }

        if limit > 0 && entries.len() > limit {
            entries.split_off(entries.len() - limit)
        } else {
            entries
        }
    }

    /// Count well-formed entries in the log.
    pub fn count(&self, chat_id: i64) -> usize {
        self.load_tail(chat_id, 0).len()
    }

    /// Case-insensitive substring search over logged content.
    pub fn search(&self, chat_id: i64, needle: &str) -> Vec<LogEntry> {
        let needle = needle.to_lowercase();
        self.load_tail(chat_id, 0)
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .collect()
    }

    /// Delete the log file. Returns true when a file was removed.
    pub fn delete(&self, chat_id: i64) -> bool {
        let path = self.path_for(chat_id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete session log {}: {}", chat_id, e);
                return false;
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log() -> (MessageLog, TempDir) {
        let dir = TempDir::new().unwrap();
        (MessageLog::new(dir.path()), dir)
    }

    #[test]
    fn test_append_and_load_roundtrip() {
        let (log, _dir) = log();
        log.append(42, Role::User, "hello");
        log.append(42, Role::Assistant, "hi");

        let entries = log.load_tail(42, 0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].content, "hello");
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].content, "hi");
        assert!(!entries[0].timestamp.is_empty());
    }

    #[test]
    fn test_load_tail_limit() {
        let (log, _dir) = log();
        for i in 0..10 {
            log.append(1, Role::User, &format!("msg {}", i));
        }
        let tail = log.load_tail(1, 3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].content, "msg 7");
        assert_eq!(tail[2].content, "msg 9");
    }

    #[test]
    fn test_load_tail_zero_loads_all() {
        let (log, _dir) = log();
        for i in 0..5 {
            log.append(1, Role::User, &format!("msg {}", i));
        }
        assert_eq!(log.load_tail(1, 0).len(), 5);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (log, _dir) = log();
        assert!(log.load_tail(99, 0).is_empty());
        assert_eq!(log.count(99), 0);
    }

    #[test]
    fn test_corrupt_line_forfeits_only_itself() {
        let (log, dir) = log();
        log.append(7, Role::User, "good one");
        // Inject a corrupt line between valid entries.
        let path = dir.path().join("7.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{not valid json").unwrap();
        drop(f);
        log.append(7, Role::Assistant, "good two");

        let entries = log.load_tail(7, 0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "good one");
        assert_eq!(entries[1].content, "good two");
    }

    #[test]
    fn test_search() {
        let (log, _dir) = log();
        log.append(3, Role::User, "I like green tea");
        log.append(3, Role::Assistant, "Noted!");
        log.append(3, Role::User, "and coffee");

        let hits = log.search(3, "TEA");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("green tea"));
    }

    #[test]
    fn test_delete() {
        let (log, _dir) = log();
        log.append(5, Role::User, "ephemeral");
        assert!(log.delete(5));
        assert!(!log.delete(5));
        assert!(log.load_tail(5, 0).is_empty());
    }

    #[test]
    fn test_per_chat_isolation() {
        let (log, _dir) = log();
        log.append(1, Role::User, "for one");
        log.append(2, Role::User, "for two");
        assert_eq!(log.count(1), 1);
        assert_eq!(log.count(2), 1);
        assert_eq!(log.load_tail(1, 0)[0].content, "for one");
    }

    #[test]
    fn test_negative_chat_id() {
        // Telegram group ids are negative; the filename must still work.
        let (log, _dir) = log();
        log.append(-100123, Role::User, "group message");
        assert_eq!(log.count(-100123), 1);
    }
}
