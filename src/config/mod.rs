//! Service configuration.

pub mod loader;
pub mod schema;

pub use loader::{data_dir, ensure_dir, load_config, memory_dir, save_config, sessions_dir};
pub use schema::{Config, LimitsConfig};
