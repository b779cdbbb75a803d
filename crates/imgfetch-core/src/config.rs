use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of download attempts per job (including the first).
    pub max_attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_millis(self.delay_ms),
        }
    }
}

/// Image cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of entries kept in memory.
    pub memory_capacity: usize,
    /// Memory-tier expiry. The persistent tier does not expire entries.
    pub ttl_minutes: u64,
    /// Enable the persistent (on-disk) tier.
    pub disk: bool,
    /// Persistent tier directory; defaults to `$XDG_CACHE_HOME/imgfetch/images`.
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,
    /// Deadline for each persistent-tier write, in milliseconds.
    pub disk_write_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 25,
            ttl_minutes: 24 * 60,
            disk: true,
            disk_dir: None,
            disk_write_timeout_ms: 15_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn disk_write_timeout(&self) -> Duration {
        Duration::from_millis(self.disk_write_timeout_ms)
    }

    /// Directory of the persistent tier: the configured one, else the XDG cache dir.
    pub fn resolved_disk_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.disk_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("imgfetch")?;
        Ok(xdg_dirs.get_cache_home().join("imgfetch").join("images"))
    }
}

/// Global configuration loaded from `~/.config/imgfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Worker threads fetching images concurrently.
    pub pool_size: usize,
    /// Buffer size used when the server does not declare a content length.
    pub default_buffer_size: usize,
    /// Connect timeout per attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read (stall) timeout per attempt, in milliseconds.
    pub read_timeout_ms: u64,
    /// Deadline for each chunk of an upload or output-file write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Optional allocation cap for a single decode or resample (None = `image` default).
    #[serde(default)]
    pub decode_max_alloc_bytes: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            default_buffer_size: 65_536,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
            write_timeout_ms: 15_000,
            decode_max_alloc_bytes: None,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("imgfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}
