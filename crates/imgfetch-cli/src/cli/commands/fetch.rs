//! `imgfetch fetch <url>...` – run requests through the scheduler and report.

use anyhow::{Context, Result};
use imgfetch_core::config::FetchConfig;
use imgfetch_core::decode::encode_png;
use imgfetch_core::job::{ChannelCompletion, FailureReason, FetchOutcome};
use imgfetch_core::scheduler::{Dispatch, Scheduler, Slot};
use imgfetch_core::upload::{write_part_body, PART_CHUNK_SIZE};
use imgfetch_core::write::BoundedWrite;
use imgfetch_core::{DecodedImage, Dims};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Loaded,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<PathBuf>,
}

impl FetchReport {
    fn new(url: &str, status: Status) -> Self {
        Self {
            url: url.to_string(),
            status,
            width: None,
            height: None,
            reason: None,
            message: None,
            saved_to: None,
        }
    }
}

pub async fn run_fetch(
    cfg: &FetchConfig,
    urls: &[String],
    dims: Option<Dims>,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    if let Some(dir) = out {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let scheduler = Scheduler::from_config(cfg)?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let completion = Arc::new(ChannelCompletion(tx));

    // One consumer per argument; repeated URLs are fetched independently.
    let mut reports: Vec<Option<FetchReport>> = Vec::with_capacity(urls.len());
    let mut awaiting: HashMap<String, Vec<usize>> = HashMap::new();
    let mut pending = 0usize;
    for (index, url) in urls.iter().enumerate() {
        let consumer = Arc::new(Slot::new());
        match scheduler.request(url, &consumer, completion.clone(), dims) {
            Dispatch::Hit | Dispatch::Queued => {
                awaiting.entry(url.clone()).or_default().push(index);
                pending += 1;
                reports.push(None);
            }
            Dispatch::Skipped(reason) => {
                let mut report = FetchReport::new(url, Status::Skipped);
                report.message = Some(format!("{:?}", reason));
                reports.push(Some(report));
            }
        }
    }
    drop(completion);

    let mut used_names = HashSet::new();
    while pending > 0 {
        let Some((key, outcome)) = rx.recv().await else {
            break;
        };
        pending -= 1;
        let Some(index) = awaiting.get_mut(&key).and_then(|slots| slots.pop()) else {
            tracing::warn!(key = %key, "outcome for a key nobody asked for");
            continue;
        };
        let report = match outcome {
            FetchOutcome::Loaded(image) => {
                let mut report = FetchReport::new(&key, Status::Loaded);
                report.width = Some(image.width());
                report.height = Some(image.height());
                if let Some(dir) = out {
                    let path = dir.join(unique_name(&key, index, &mut used_names));
                    match save_png(&image, &path, cfg.write_timeout()) {
                        Ok(()) => report.saved_to = Some(path),
                        Err(e) => {
                            tracing::warn!(key = %key, error = %format!("{:#}", e), "saving image failed");
                            report.status = Status::Failed;
                            report.message = Some(format!("{:#}", e));
                        }
                    }
                }
                report
            }
            FetchOutcome::Failed { reason, message } => {
                let mut report = FetchReport::new(&key, Status::Failed);
                report.reason = Some(reason);
                report.message = Some(message);
                report
            }
        };
        reports[index] = Some(report);
    }

    tokio::task::spawn_blocking(move || scheduler.shutdown())
        .await
        .context("scheduler shutdown")?;

    let reports: Vec<FetchReport> = reports.into_iter().flatten().collect();
    print_reports(&reports, json)?;

    let failed = reports
        .iter()
        .filter(|r| !matches!(r.status, Status::Loaded))
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} fetches did not load", failed, urls.len());
    }
    Ok(())
}

fn print_reports(reports: &[FetchReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    println!("{:<8} {:<11} {}", "STATUS", "SIZE", "URL");
    for r in reports {
        let size = match (r.width, r.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "-".to_string(),
        };
        let status = format!("{:?}", r.status).to_lowercase();
        println!("{:<8} {:<11} {}", status, size, r.url);
        if let Some(message) = &r.message {
            println!("         {}", message);
        }
        if let Some(path) = &r.saved_to {
            println!("         saved to {}", path.display());
        }
    }
    Ok(())
}

/// Encode as PNG and write through a bounded writer.
fn save_png(image: &DecodedImage, path: &Path, timeout: Duration) -> Result<()> {
    let png = encode_png(image).context("encode png")?;
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let out = BoundedWrite::new(file, Some(timeout)).context("start writer")?;
    write_part_body(&out, Cursor::new(png), PART_CHUNK_SIZE)
        .with_context(|| format!("write {}", path.display()))?;
    out.into_inner().context("close writer")?;
    tracing::debug!(path = %path.display(), "image saved");
    Ok(())
}

/// File name for the `index`-th URL: `<stem>.png`, or `image-<index>.png`
/// when the URL has no usable last path segment.
fn output_name(url: &str, index: usize) -> String {
    let stem = url::Url::parse(url).ok().and_then(|u| {
        let last = u.path_segments()?.filter(|s| !s.is_empty()).last()?.to_string();
        let stem = Path::new(&last).file_stem()?.to_string_lossy().into_owned();
        let clean: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        (!clean.is_empty()).then_some(clean)
    });
    match stem {
        Some(stem) => format!("{}.png", stem),
        None => format!("image-{}.png", index),
    }
}

fn unique_name(url: &str, index: usize, used: &mut HashSet<String>) -> String {
    let mut name = output_name(url, index);
    if !used.insert(name.clone()) {
        name = format!("{}-{}", index, name);
        used.insert(name.clone());
    }
    name
}
