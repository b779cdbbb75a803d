//! One fetch of one key: cache lookup, retrieval with retries, decode, cache write.
//!
//! A job produces exactly one [`FetchOutcome`]. Raw bytes are written to the
//! cache only after they decoded successfully, so a failed job never leaves a
//! cache entry behind.

mod completion;
mod fetch;

pub use completion::{ChannelCompletion, Completion};
pub use fetch::retrieve;

use bytes::Bytes;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::cache::ImageCache;
use crate::decode::{DecodeError, DecodedImage, Decoder, Dims};
use crate::retry::{run_with_retry, FetchError, RetryPolicy};
use crate::transport::Transport;

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Transport,
    Decode,
    OutOfMemory,
    Panicked,
}

impl FailureReason {
    fn of(err: &FetchError) -> Self {
        match err {
            FetchError::Transport(_) => FailureReason::Transport,
            FetchError::Decode(DecodeError::Malformed(_)) => FailureReason::Decode,
            FetchError::Decode(DecodeError::OutOfMemory(_) | DecodeError::ScaleExhausted(_)) => {
                FailureReason::OutOfMemory
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Transport => "transport",
            FailureReason::Decode => "decode",
            FailureReason::OutOfMemory => "out_of_memory",
            FailureReason::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Loaded(DecodedImage),
    Failed { reason: FailureReason, message: String },
}

impl FetchOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, FetchOutcome::Loaded(_))
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        match self {
            FetchOutcome::Loaded(image) => Some(image),
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            FetchOutcome::Loaded(_) => None,
            FetchOutcome::Failed { reason, .. } => Some(*reason),
        }
    }

    fn failed(err: &FetchError) -> Self {
        FetchOutcome::Failed {
            reason: FailureReason::of(err),
            message: err.to_string(),
        }
    }
}

/// Lifecycle of a job, logged at debug level as it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fetching { attempt: u32 },
    Retry { attempt: u32 },
    Decoded,
    Failed,
}

pub struct FetchJob {
    key: String,
    dims: Option<Dims>,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ImageCache>,
    policy: RetryPolicy,
    default_buffer_size: usize,
    decoder: Decoder,
}

impl FetchJob {
    pub fn new(key: impl Into<String>, transport: Arc<dyn Transport>, cache: Arc<dyn ImageCache>) -> Self {
        let job = Self {
            key: key.into(),
            dims: None,
            transport,
            cache,
            policy: RetryPolicy::default(),
            default_buffer_size: 65_536,
            decoder: Decoder::default(),
        };
        job.transition(JobState::Pending);
        job
    }

    /// Scale the result to fit `dims`.
    pub fn with_dims(mut self, dims: Option<Dims>) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dims(&self) -> Option<Dims> {
        self.dims
    }

    /// Run to completion on the current thread.
    pub fn run(&self) -> FetchOutcome {
        let decoded = match self.dims {
            Some(d) => self.cache.get_scaled(&self.key, d),
            None => self.cache.get_image(&self.key),
        };
        if let Some(image) = decoded {
            tracing::debug!(key = %self.key, "decoded entry cached; skipping retrieval");
            return match self.cache.get(&self.key) {
                Some(bytes) => self.finish(bytes, image),
                None => {
                    self.transition(JobState::Decoded);
                    FetchOutcome::Loaded(image)
                }
            };
        }

        if let Some(bytes) = self.cache.get(&self.key) {
            tracing::debug!(key = %self.key, len = bytes.len(), "raw bytes cached; skipping retrieval");
            match self.decode(&bytes) {
                Ok(image) => return self.finish(bytes, image),
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "cached bytes unusable; refetching");
                }
            }
        }

        let res = run_with_retry(&self.policy, |attempt| {
            if attempt > 1 {
                self.transition(JobState::Retry { attempt });
            }
            self.transition(JobState::Fetching { attempt });
            let bytes = retrieve(self.transport.as_ref(), &self.key, self.default_buffer_size)?;
            let image = self.decode(&bytes)?;
            Ok((bytes, image))
        });

        match res {
            Ok((bytes, image)) => self.finish(bytes, image),
            Err(e) => {
                self.transition(JobState::Failed);
                tracing::warn!(key = %self.key, error = %e, "fetch failed");
                FetchOutcome::failed(&e)
            }
        }
    }

    /// Like [`run`](Self::run), but a panic becomes a `Panicked` failure.
    pub fn run_catching(&self) -> FetchOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.transition(JobState::Failed);
                tracing::error!(key = %self.key, %message, "fetch job panicked");
                FetchOutcome::Failed {
                    reason: FailureReason::Panicked,
                    message,
                }
            }
        }
    }

    /// Run and hand the outcome to `completion`.
    pub fn run_and_deliver(&self, completion: &dyn Completion) {
        let outcome = self.run_catching();
        completion.complete(&self.key, outcome);
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let reclaim = || self.cache.reclaim();
        let image = match self.dims {
            Some(dims) => self.decoder.decode_and_resize(bytes, dims, &reclaim)?,
            None => self.decoder.decode(bytes, &reclaim)?,
        };
        Ok(Arc::new(image))
    }

    fn finish(&self, bytes: Bytes, image: DecodedImage) -> FetchOutcome {
        self.cache.put(&self.key, bytes);
        self.cache.put_image(&self.key, self.dims, Arc::clone(&image));
        self.transition(JobState::Decoded);
        FetchOutcome::Loaded(image)
    }

    fn transition(&self, state: JobState) {
        tracing::debug!(key = %self.key, ?state, "job state");
    }
}

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
