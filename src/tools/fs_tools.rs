//! File tools: read, write, edit, list.
//!
//! All paths go through the [`PathGuard`] allowlist before any I/O.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_str, Tool};
use super::path_guard::PathGuard;

// ---------------------------------------------------------------------------
// ReadFileTool
// ---------------------------------------------------------------------------

/// Read a file inside the allowed directories.
pub struct ReadFileTool {
    guard: Arc<PathGuard>,
}

impl ReadFileTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Only paths inside the workspace or /tmp are allowed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute file path to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let path = match require_str(input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let (mut file, resolved) = match self.guard.open_checked(path) {
            Ok(pair) => pair,
            Err(e) => return e,
        };

        let mut bytes = Vec::new();
        if let Err(e) = file.read_to_end(&mut bytes) {
            return format!("Error reading file: {}", e);
        }

        // Binary detection: null bytes in the first 512 bytes.
        let check_len = bytes.len().min(512);
        if bytes[..check_len].contains(&0u8) {
            return format!("[Binary file: {}, {} bytes]", resolved.display(), bytes.len());
        }

        String::from_utf8_lossy(&bytes).to_string()
    }
}

// ---------------------------------------------------------------------------
// WriteFileTool
// ---------------------------------------------------------------------------

/// Write content to a file, creating parent directories inside the root.
pub struct WriteFileTool {
    guard: Arc<PathGuard>,
}

impl WriteFileTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if needed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute file path to write"},
                "content": {"type": "string", "description": "The content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let path = match require_str(input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match input["content"].as_str() {
            Some(c) => c,
            None => return "Error: 'content' parameter is required".to_string(),
        };

        let resolved = match self.guard.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return format!("Error creating directories: {}", e);
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => format!("Wrote {} bytes to {}", content.len(), path),
            Err(e) => format!("Error writing file: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// EditFileTool
// ---------------------------------------------------------------------------

/// Replace an exact text fragment in a file.
pub struct EditFileTool {
    guard: Arc<PathGuard>,
}

impl EditFileTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing old_text with new_text. old_text must match exactly once."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute file path to edit"},
                "old_text": {"type": "string", "description": "Exact text to replace"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let path = match require_str(input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let old_text = match require_str(input, "old_text") {
            Ok(t) => t,
            Err(e) => return e,
        };
        let new_text = match input["new_text"].as_str() {
            Some(t) => t,
            None => return "Error: 'new_text' parameter is required".to_string(),
        };

        let resolved = match self.guard.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return format!("Error reading file: {}", e),
        };

        let count = content.matches(old_text).count();
        if count == 0 {
            return "Error: old_text not found in file. Use read_file and copy the exact text."
                .to_string();
        }
        if count > 1 {
            return format!(
                "Error: old_text appears {} times. Provide more context to make it unique.",
                count
            );
        }

        let updated = content.replacen(old_text, new_text, 1);
        match tokio::fs::write(&resolved, updated).await {
            Ok(()) => format!("Edited {}", path),
            Err(e) => format!("Error writing file: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// ListDirTool
// ---------------------------------------------------------------------------

/// List a directory inside the allowed roots.
pub struct ListDirTool {
    guard: Arc<PathGuard>,
}

impl ListDirTool {
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute directory path to list"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _chat_id: i64, input: &Value) -> String {
        let path = match require_str(input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let resolved = match self.guard.resolve_read(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !resolved.is_dir() {
            return format!("Error: not a directory: {}", path);
        }

        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(e) => e,
            Err(e) => return format!("Error listing directory: {}", e),
        };

        let mut items: Vec<(bool, String)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            items.push((is_dir, name));
        }

        if items.is_empty() {
            return format!("Directory {} is empty", path);
        }
        items.sort_by(|a, b| a.1.cmp(&b.1));
        items
            .into_iter()
            .map(|(is_dir, name)| {
                if is_dir {
                    format!("[dir]  {}", name)
                } else {
                    format!("[file] {}", name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guard_for(dir: &TempDir) -> Arc<PathGuard> {
        Arc::new(PathGuard::with_roots(vec![dir.path().to_path_buf()]))
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hello world").unwrap();

        let tool = ReadFileTool::new(guard_for(&dir));
        let out = tool
            .execute(1, &json!({"path": file.to_str().unwrap()}))
            .await;
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_read_binary_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("blob.bin");
        std::fs::write(&file, b"\x89PNG\x00\x00data").unwrap();

        let tool = ReadFileTool::new(guard_for(&dir));
        let out = tool
            .execute(1, &json!({"path": file.to_str().unwrap()}))
            .await;
        assert!(out.starts_with("[Binary file:"));
    }

    #[tokio::test]
    async fn test_read_outside_root_denied() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(guard_for(&dir));
        let out = tool.execute(1, &json!({"path": "/etc/hostname"})).await;
        assert!(out.starts_with("Error:"), "got: {}", out);
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a").join("b").join("note.txt");

        let tool = WriteFileTool::new(guard_for(&dir));
        let out = tool
            .execute(
                1,
                &json!({"path": target.to_str().unwrap(), "content": "saved"}),
            )
            .await;
        assert!(out.starts_with("Wrote"));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "saved");
    }

    #[tokio::test]
    async fn test_write_blocked_filename() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join(".env");
        let tool = WriteFileTool::new(guard_for(&dir));
        let out = tool
            .execute(
                1,
                &json!({"path": target.to_str().unwrap(), "content": "KEY=1"}),
            )
            .await;
        assert!(out.contains("access denied"));
    }

    #[tokio::test]
    async fn test_edit_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("edit.txt");
        std::fs::write(&file, "Hello World!").unwrap();

        let tool = EditFileTool::new(guard_for(&dir));
        let out = tool
            .execute(
                1,
                &json!({
                    "path": file.to_str().unwrap(),
                    "old_text": "World",
                    "new_text": "Rust"
                }),
            )
            .await;
        assert!(out.starts_with("Edited"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "Hello Rust!");
    }

    #[tokio::test]
    async fn test_edit_file_ambiguous_match() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dup.txt");
        std::fs::write(&file, "aaa bbb aaa").unwrap();

        let tool = EditFileTool::new(guard_for(&dir));
        let out = tool
            .execute(
                1,
                &json!({
                    "path": file.to_str().unwrap(),
                    "old_text": "aaa",
                    "new_text": "ccc"
                }),
            )
            .await;
        assert!(out.contains("appears 2 times"));
    }

    #[tokio::test]
    async fn test_edit_file_not_found_text() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "content").unwrap();

        let tool = EditFileTool::new(guard_for(&dir));
        let out = tool
            .execute(
                1,
                &json!({
                    "path": file.to_str().unwrap(),
                    "old_text": "missing",
                    "new_text": "x"
                }),
            )
            .await;
        assert!(out.contains("old_text not found"));
    }

    #[tokio::test]
    async fn test_list_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = ListDirTool::new(guard_for(&dir));
        let out = tool
            .execute(1, &json!({"path": dir.path().to_str().unwrap()}))
            .await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "[file] a.txt");
        assert_eq!(lines[1], "[file] b.txt");
        assert_eq!(lines[2], "[dir]  sub");
    }

    #[tokio::test]
    async fn test_list_empty_dir() {
        let dir = TempDir::new().unwrap();
        let tool = ListDirTool::new(guard_for(&dir));
        let out = tool
            .execute(1, &json!({"path": dir.path().to_str().unwrap()}))
            .await;
        assert!(out.contains("is empty"));
    }
}
