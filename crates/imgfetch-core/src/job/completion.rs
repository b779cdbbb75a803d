//! Where a finished job's outcome goes.

use tokio::sync::mpsc::UnboundedSender;

use super::FetchOutcome;

/// Receives the outcome of a job, once, on the worker thread that ran it
/// (or on the requesting thread for a cache hit). Implementations that need
/// their results on another thread hand them off themselves.
pub trait Completion: Send + Sync {
    fn complete(&self, key: &str, outcome: FetchOutcome);
}

impl<F> Completion for F
where
    F: Fn(&str, FetchOutcome) + Send + Sync,
{
    fn complete(&self, key: &str, outcome: FetchOutcome) {
        self(key, outcome)
    }
}

/// Forwards outcomes into a tokio channel, for async consumers.
#[derive(Debug, Clone)]
pub struct ChannelCompletion(pub UnboundedSender<(String, FetchOutcome)>);

impl Completion for ChannelCompletion {
    fn complete(&self, key: &str, outcome: FetchOutcome) {
        if self.0.send((key.to_string(), outcome)).is_err() {
            tracing::debug!(key, "completion receiver dropped; outcome discarded");
        }
    }
}
