//! CLI command handlers, one file per command.

mod cache;
mod config;
mod fetch;

pub use cache::{run_cache_clear, run_cache_path};
pub use config::run_config;
pub use fetch::run_fetch;
