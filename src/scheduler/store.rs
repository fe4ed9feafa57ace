//! Persistence for scheduled jobs.
//!
//! A single versioned JSON file, rewritten atomically (temp file + rename)
//! on every mutation. All writes funnel through one owner; readers get
//! snapshots.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::types::JobStore;
use crate::errors::ScheduleError;

/// Filename inside the data directory.
pub const JOB_STORE_FILENAME: &str = "cron-jobs.json";

/// File-backed job store.
pub struct PersistentJobStore {
    path: PathBuf,
}

impl PersistentJobStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Load the store, falling back to empty on a missing or corrupt file
    /// (corruption is logged; jobs are not worth refusing startup over).
    pub fn load(&self) -> JobStore {
        if !self.path.exists() {
            return JobStore::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(store) => store,
                Err(e) => {
                    warn!("Corrupt job store ({}), starting empty", e);
                    JobStore::default()
                }
            },
            Err(e) => {
                warn!("Failed to read job store ({}), starting empty", e);
                JobStore::default()
            }
        }
    }

    /// Atomically overwrite the whole store.
    pub fn save(&self, store: &JobStore) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ScheduleError::Persistence(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(store)
            .map_err(|e| ScheduleError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| ScheduleError::Persistence(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| ScheduleError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::{Job, JobPayload, Schedule};
    use tempfile::TempDir;

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            chat_id: 1,
            name: "test".into(),
            schedule: Schedule::At { at_ms: 1000 },
            payload: JobPayload::SystemEvent {
                event: "reminder".into(),
            },
            enabled: true,
            created_at_ms: 0,
            last_run_ms: None,
            next_run_ms: None,
            run_count: 0,
            max_runs: None,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = PersistentJobStore::new(&dir.path().join(JOB_STORE_FILENAME));
        let loaded = store.load();
        assert_eq!(loaded.version, 1);
        assert!(loaded.jobs.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOB_STORE_FILENAME);
        let store = PersistentJobStore::new(&path);

        let mut data = JobStore::default();
        data.jobs.push(job("aaa"));
        data.jobs.push(job("bbb"));
        store.save(&data).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.jobs.len(), 2);
        assert_eq!(loaded.jobs[0].id, "aaa");
        // The temp file was renamed away.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOB_STORE_FILENAME);
        fs::write(&path, "{broken").unwrap();
        let store = PersistentJobStore::new(&path);
        assert!(store.load().jobs.is_empty());
    }

    #[test]
    fn test_version_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(JOB_STORE_FILENAME);
        let store = PersistentJobStore::new(&path);
        store.save(&JobStore::default()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["jobs"].is_array());
    }
}
