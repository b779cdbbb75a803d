//! CLI for imgfetch.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgfetch_core::config;
use imgfetch_core::Dims;
use std::path::PathBuf;

use commands::{run_cache_clear, run_cache_path, run_config, run_fetch};

/// Top-level CLI for imgfetch.
#[derive(Debug, Parser)]
#[command(name = "imgfetch")]
#[command(about = "imgfetch: fetch, decode and cache remote images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more images through the worker pool and cache.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Scale to fit this width (requires --height).
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Scale to fit this height (requires --width).
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Save each decoded image as PNG into this directory.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Print a JSON report instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the image cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the config file location and contents.
    Config,
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove every cached image (memory and disk).
    Clear,
    /// Print the disk cache directory.
    Path,
}

/// Both sides or neither; zero is rejected.
fn target_dims(width: Option<u32>, height: Option<u32>) -> Result<Option<Dims>> {
    match (width, height) {
        (Some(w), Some(h)) => Dims::new(w, h)
            .map(Some)
            .with_context(|| format!("invalid target size {}x{}", w, h)),
        _ => Ok(None),
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                urls,
                width,
                height,
                out,
                json,
            } => {
                let dims = target_dims(width, height)?;
                run_fetch(&cfg, &urls, dims, out.as_deref(), json).await?;
            }
            CliCommand::Cache { action } => match action {
                CacheAction::Clear => run_cache_clear(&cfg)?,
                CacheAction::Path => run_cache_path(&cfg)?,
            },
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
