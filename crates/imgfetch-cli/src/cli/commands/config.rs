//! `imgfetch config` – where the config lives and what is in it.

use anyhow::{Context, Result};
use imgfetch_core::config::{self, FetchConfig};
use std::fs;

pub fn run_config(cfg: &FetchConfig) -> Result<()> {
    let path = config::config_path()?;
    println!("# {}", path.display());
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    print!("{}", contents);
    if !contents.ends_with('\n') {
        println!();
    }
    tracing::debug!(pool_size = cfg.pool_size, "effective config shown");
    Ok(())
}
