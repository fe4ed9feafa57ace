//! Path validation for the file tools.
//!
//! Every path the model supplies must resolve inside an allowlisted root
//! (the workspace and `/tmp`). Symlinks at the final component are rejected
//! via `lstat`, and opened descriptors are compared by device/inode against
//! the resolved path to close the TOCTOU window. A blocklist of dangerous
//! filenames is enforced after resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Filename patterns that are never readable or writable through the tools:
/// shell rc files, ssh material, env files, git hooks.
const BLOCKED_NAMES: &[&str] = &[
    ".bashrc",
    ".bash_profile",
    ".zshrc",
    ".zprofile",
    ".profile",
    ".netrc",
    "authorized_keys",
    "known_hosts",
    "id_rsa",
    "id_ed25519",
];

const BLOCKED_PREFIXES: &[&str] = &[".env"];

const BLOCKED_DIRS: &[&str] = &[".ssh"];

/// Validated access to paths under a set of allowlisted roots.
pub struct PathGuard {
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Guard allowing the given roots plus `/tmp`.
    pub fn new(workspace_root: &Path) -> Self {
        let mut roots = vec![workspace_root.to_path_buf()];
        roots.push(PathBuf::from("/tmp"));
        Self { roots }
    }

    /// Guard with explicit roots (tests).
    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Resolve a path for reading: must exist, resolve inside a root, not be
    /// a symlink, and not match the blocklist.
    pub fn resolve_read(&self, raw: &str) -> Result<PathBuf, String> {
        let path = PathBuf::from(raw);
        if path.is_relative() {
            return Err("Error: path must be absolute".to_string());
        }

        // Symlink check on the unresolved final component first.
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(format!("Error: access denied: {} is a symlink", raw));
            }
            Ok(_) => {}
            Err(_) => return Err(format!("Error: file not found: {}", raw)),
        }

        let resolved = path
            .canonicalize()
            .map_err(|e| format!("Error: cannot resolve {}: {}", raw, e))?;
        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    /// Resolve a path for writing. The file may not exist yet; the nearest
    /// existing ancestor is canonicalized and every remaining component is
    /// validated before the final path is checked against the blocklist.
    pub fn resolve_write(&self, raw: &str) -> Result<PathBuf, String> {
        let path = PathBuf::from(raw);
        if path.is_relative() {
            return Err("Error: path must be absolute".to_string());
        }

        // An existing target must not be a symlink.
        if let Ok(meta) = fs::symlink_metadata(&path) {
            if meta.file_type().is_symlink() {
                return Err(format!("Error: access denied: {} is a symlink", raw));
            }
        }

        // Walk up to the nearest existing ancestor, collecting the tail.
        let mut existing = path.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return Err(format!("Error: cannot resolve {}", raw)),
            }
        }

        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("Error: cannot resolve {}: {}", raw, e))?;
        for name in tail.iter().rev() {
            // No traversal tricks in the not-yet-existing tail.
            let component = Path::new(name);
            if component
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(format!("Error: invalid path component in {}", raw));
            }
            resolved.push(name);
        }

        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    /// Open a file for reading with the descriptor verified against the
    /// resolved path: the post-open device/inode pair must match a fresh
    /// stat, defeating swap-after-check races.
    pub fn open_checked(&self, raw: &str) -> Result<(fs::File, PathBuf), String> {
        let resolved = self.resolve_read(raw)?;
        let file =
            fs::File::open(&resolved).map_err(|e| format!("Error: cannot open {}: {}", raw, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let opened = file
                .metadata()
                .map_err(|e| format!("Error: stat failed: {}", e))?;
            let on_disk = fs::symlink_metadata(&resolved)
                .map_err(|e| format!("Error: stat failed: {}", e))?;
            if opened.dev() != on_disk.dev() || opened.ino() != on_disk.ino() {
                return Err(format!(
                    "Error: access denied: {} changed while opening",
                    raw
                ));
            }
        }

        Ok((file, resolved))
    }

    fn check_resolved(&self, resolved: &Path) -> Result<(), String> {
        if !self.roots.iter().any(|root| {
            root.canonicalize()
                .map(|r| resolved.starts_with(&r))
                .unwrap_or(false)
        }) {
            return Err(format!(
                "Error: access denied: {} is outside the allowed directories",
                resolved.display()
            ));
        }

        if let Some(blocked) = blocked_reason(resolved) {
            return Err(format!(
                "Error: access denied: {} ({})",
                resolved.display(),
                blocked
            ));
        }
        Ok(())
    }
}

/// Check a resolved path against the dangerous-filename blocklist.
fn blocked_reason(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();

    if BLOCKED_NAMES.iter().any(|b| name == *b) {
        return Some("blocked filename");
    }
    if BLOCKED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Some("blocked filename");
    }
    for component in path.components() {
        if let Component::Normal(part) = component {
            let part = part.to_string_lossy().to_lowercase();
            if BLOCKED_DIRS.iter().any(|d| part == *d) {
                return Some("blocked directory");
            }
        }
    }
    // Git hooks are executable on checkout; never let the model write them.
    let display = path.to_string_lossy().to_lowercase();
    if display.contains("/.git/hooks/") {
        return Some("git hooks are blocked");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guard(dir: &TempDir) -> PathGuard {
        PathGuard::with_roots(vec![dir.path().to_path_buf()])
    }

    #[test]
    fn test_read_inside_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("note.txt");
        fs::write(&file, "ok").unwrap();

        let guard = guard(&dir);
        let resolved = guard.resolve_read(file.to_str().unwrap()).unwrap();
        assert!(resolved.ends_with("note.txt"));
    }

    #[test]
    fn test_read_outside_root_denied() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("secret.txt");
        fs::write(&file, "no").unwrap();

        let guard = guard(&dir);
        let err = guard.resolve_read(file.to_str().unwrap()).unwrap_err();
        assert!(err.contains("access denied"));
    }

    #[test]
    fn test_relative_path_denied() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        assert!(guard.resolve_read("note.txt").is_err());
        assert!(guard.resolve_write("note.txt").is_err());
    }

    #[test]
    fn test_traversal_out_of_root_denied() {
        let dir = TempDir::new().unwrap();
        let sneaky = format!("{}/../../etc/passwd", dir.path().display());
        let guard = guard(&dir);
        assert!(guard.resolve_read(&sneaky).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_rejected() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real.txt");
        fs::write(&target, "data").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let guard = guard(&dir);
        let err = guard.resolve_read(link.to_str().unwrap()).unwrap_err();
        assert!(err.contains("symlink"));
    }

    #[test]
    fn test_write_to_new_path_validates_parent() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);

        let fresh = dir.path().join("sub").join("new.txt");
        let resolved = guard.resolve_write(fresh.to_str().unwrap()).unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_write_with_traversal_tail_denied() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let sneaky = format!("{}/missing/../../../etc/cron.d/x", dir.path().display());
        assert!(guard.resolve_write(&sneaky).is_err());
    }

    #[test]
    fn test_blocklist_shell_rc() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let rc = dir.path().join(".bashrc");
        let err = guard.resolve_write(rc.to_str().unwrap()).unwrap_err();
        assert!(err.contains("access denied"));
    }

    #[test]
    fn test_blocklist_env_files() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        for name in [".env", ".env.local", ".env.production"] {
            let path = dir.path().join(name);
            assert!(
                guard.resolve_write(path.to_str().unwrap()).is_err(),
                "{} should be blocked",
                name
            );
        }
    }

    #[test]
    fn test_blocklist_ssh_dir() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let key = dir.path().join(".ssh").join("config");
        assert!(guard.resolve_write(key.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_blocklist_git_hooks() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let hook = dir.path().join(".git").join("hooks").join("pre-commit");
        assert!(guard.resolve_write(hook.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_open_checked_reads() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data.txt");
        fs::write(&file, "payload").unwrap();

        let guard = guard(&dir);
        let (mut handle, _resolved) = guard.open_checked(file.to_str().unwrap()).unwrap();
        use std::io::Read;
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        assert_eq!(content, "payload");
    }

    #[test]
    fn test_plain_write_target_allowed() {
        let dir = TempDir::new().unwrap();
        let guard = guard(&dir);
        let existing = dir.path().join("notes.md");
        fs::write(&existing, "old").unwrap();
        assert!(guard.resolve_write(existing.to_str().unwrap()).is_ok());
    }
}
