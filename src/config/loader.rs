//! Config loading and path resolution.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use super::schema::Config;

/// Data directory for all persisted state: `~/.companionbot`.
pub fn data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    ensure_dir(home.join(".companionbot"))
}

/// Sessions directory: `<data>/sessions`.
pub fn sessions_dir(data: &Path) -> PathBuf {
    ensure_dir(data.join("sessions"))
}

/// Memory directory: `<data>/memory`.
pub fn memory_dir(data: &Path) -> PathBuf {
    ensure_dir(data.join("memory"))
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref().to_path_buf();
    if !path.exists() {
        let _ = fs::create_dir_all(&path);
    }
    path
}

/// Load the config from `<data>/config.json`, falling back to defaults when
/// the file is absent or unreadable (a malformed file is logged, not fatal).
pub fn load_config(data: &Path) -> Config {
    let path = data.join("config.json");
    if !path.exists() {
        return Config::default();
    }
    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Malformed config.json ({}), using defaults", e);
                Config::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config.json ({}), using defaults", e);
            Config::default()
        }
    }
}

/// Write the config back to `<data>/config.json`.
pub fn save_config(data: &Path, config: &Config) -> Result<()> {
    let path = data.join("config.json");
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.default_model, "sonnet");
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.default_model = "opus".to_string();
        config.limits.max_sessions = 7;
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path());
        assert_eq!(loaded.default_model, "opus");
        assert_eq!(loaded.limits.max_sessions, 7);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), "{not json").unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.limits.max_sessions, 100);
    }

    #[test]
    fn test_ensure_dir_creates() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let out = ensure_dir(&nested);
        assert!(out.is_dir());
    }
}
