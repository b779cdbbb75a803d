//! Request scheduler.
//!
//! Maps consumer requests to fetch jobs on a bounded worker pool:
//! consumer association → memory-tier hit check → job dispatch → guarded delivery.
//! Duplicate requests for one key from distinct consumers each get their own job.

mod consumer;
mod pool;

pub use consumer::{Consumer, Slot};
pub use pool::WorkerPool;

use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;

use crate::cache::{ImageCache, TieredCache};
use crate::config::FetchConfig;
use crate::decode::{Decoder, Dims};
use crate::job::{Completion, FetchJob, FetchOutcome};
use crate::retry::RetryPolicy;
use crate::transport::{CurlTransport, Transport};

/// What `request` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Served from the memory tier; the callback already ran on this thread.
    Hit,
    /// A job was queued; the callback runs on a worker when it finishes.
    Queued,
    /// Nothing happened and the callback will not run.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or blank key.
    MissingKey,
    /// The consumer already awaits this key.
    AlreadyAwaiting,
    /// The worker pool no longer accepts jobs.
    ShutDown,
}

pub struct Scheduler {
    pool: WorkerPool,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ImageCache>,
    policy: RetryPolicy,
    default_buffer_size: usize,
    decoder: Decoder,
}

impl Scheduler {
    pub fn new(
        cfg: &FetchConfig,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn ImageCache>,
    ) -> io::Result<Self> {
        let pool = WorkerPool::new(cfg.pool_size)?;
        Ok(Self {
            pool,
            transport,
            cache,
            policy: cfg.retry.policy(),
            default_buffer_size: cfg.default_buffer_size,
            decoder: Decoder::new(cfg.decode_max_alloc_bytes),
        })
    }

    /// Curl transport and tiered cache, both configured from `cfg`.
    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        let decoder = Decoder::new(cfg.decode_max_alloc_bytes);
        let cache = TieredCache::from_config(&cfg.cache, decoder).context("failed to open image cache")?;
        let transport = CurlTransport::from_config(cfg);
        Self::new(cfg, Arc::new(transport), Arc::new(cache)).context("failed to start worker pool")
    }

    /// Ask for `key` on behalf of `consumer`; `callback` receives the outcome.
    ///
    /// The callback runs at most once: synchronously for a memory-tier hit,
    /// on a worker thread for a queued job, and not at all if the consumer has
    /// moved on to another key by the time the job finishes.
    pub fn request<C>(
        &self,
        key: &str,
        consumer: &Arc<C>,
        callback: Arc<dyn Completion>,
        dims: Option<Dims>,
    ) -> Dispatch
    where
        C: Consumer + 'static,
    {
        if key.trim().is_empty() {
            return Dispatch::Skipped(SkipReason::MissingKey);
        }
        if consumer.replace_key(Some(key)).as_deref() == Some(key) {
            tracing::debug!(key, "consumer already awaits key");
            return Dispatch::Skipped(SkipReason::AlreadyAwaiting);
        }

        if self.cache.contains_key_in_memory(key) {
            let hit = match dims {
                Some(d) => self.cache.get_scaled(key, d),
                None => self.cache.get_image(key),
            };
            if let Some(image) = hit {
                tracing::debug!(key, "memory hit; delivering synchronously");
                callback.complete(key, FetchOutcome::Loaded(image));
                return Dispatch::Hit;
            }
        }

        let job = FetchJob::new(key, Arc::clone(&self.transport), Arc::clone(&self.cache))
            .with_dims(dims)
            .with_retry_policy(self.policy)
            .with_default_buffer_size(self.default_buffer_size)
            .with_decoder(self.decoder.clone());
        let awaiting = Arc::clone(consumer);
        let submitted = self.pool.submit(move || {
            let outcome = job.run_catching();
            deliver(&job, awaiting.as_ref(), callback.as_ref(), outcome);
        });
        if !submitted {
            tracing::warn!(key, "worker pool is shut down; request dropped");
            consumer.set_current_key(None);
            return Dispatch::Skipped(SkipReason::ShutDown);
        }
        Dispatch::Queued
    }

    pub fn cache(&self) -> &Arc<dyn ImageCache> {
        &self.cache
    }

    /// Drop every cached entry, e.g. when the host is short on memory.
    pub fn clear_cache(&self) {
        tracing::info!("clearing image cache");
        self.cache.clear();
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Stop accepting jobs, finish the queued ones, and join the workers.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

/// Forward `outcome` only if the consumer still awaits the job's key.
fn deliver(job: &FetchJob, consumer: &dyn Consumer, callback: &dyn Completion, outcome: FetchOutcome) {
    let key = job.key();
    if consumer.current_key().as_deref() == Some(key) {
        callback.complete(key, outcome);
    } else {
        tracing::debug!(key, "consumer moved on; result dropped");
    }
}

#[cfg(test)]
mod tests;
