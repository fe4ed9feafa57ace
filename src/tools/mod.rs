//! Model-invocable tools and their registry.

pub mod agent_tools;
pub mod base;
pub mod fs_tools;
pub mod memory_tools;
pub mod path_guard;
pub mod registry;
pub mod schedule_tools;
pub mod shell;
pub mod web;

pub use agent_tools::{CancelAgentTool, ListAgentsTool, SpawnAgentTool};
pub use base::Tool;
pub use fs_tools::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use memory_tools::{PinContextTool, SaveMemoryTool, SearchMemoryTool};
pub use path_guard::PathGuard;
pub use registry::{ToolRegistry, MAX_TOOL_RESULT_CHARS};
pub use schedule_tools::{CancelReminderTool, ListRemindersTool, ScheduleReminderTool};
pub use shell::{ProcessRegistry, RunCommandTool};
pub use web::{WebFetchTool, WebSearchTool};
