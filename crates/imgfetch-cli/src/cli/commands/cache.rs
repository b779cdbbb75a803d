//! `imgfetch cache clear|path`

use anyhow::Result;
use imgfetch_core::cache::{ImageCache, TieredCache};
use imgfetch_core::config::FetchConfig;
use imgfetch_core::decode::Decoder;

pub fn run_cache_clear(cfg: &FetchConfig) -> Result<()> {
    let cache = TieredCache::from_config(&cfg.cache, Decoder::default())?;
    cache.clear();
    match cache.disk() {
        Some(disk) => println!("Cleared image cache at {}", disk.dir().display()),
        None => println!("Disk cache disabled; nothing to clear."),
    }
    Ok(())
}

pub fn run_cache_path(cfg: &FetchConfig) -> Result<()> {
    let dir = cfg.cache.resolved_disk_dir()?;
    if cfg.cache.disk {
        println!("{}", dir.display());
    } else {
        println!("{} (disabled)", dir.display());
    }
    Ok(())
}
