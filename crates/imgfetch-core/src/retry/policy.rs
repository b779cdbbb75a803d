use std::time::Duration;

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Network-level failure (connection reset, DNS, short body, etc.).
    Connection,
    /// Server answered with a non-2xx status.
    Http(u16),
    /// Decode or scale ran out of its memory budget.
    OutOfMemory,
    /// Bytes arrived but are not an image. Fetching them again will not help.
    Decode,
    /// Bytes decoded but the final scale pass ran out of memory.
    ScaleExhausted,
    /// Anything else the transport reported.
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed-delay retry policy: up to `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt). Returns `RetryDecision::NoRetry`
    /// when we should stop retrying. No pause follows the final attempt.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }

        match kind {
            ErrorKind::Decode | ErrorKind::ScaleExhausted => RetryDecision::NoRetry,
            ErrorKind::Timeout
            | ErrorKind::Connection
            | ErrorKind::Http(_)
            | ErrorKind::OutOfMemory
            | ErrorKind::Other => RetryDecision::RetryAfter(self.delay),
        }
    }
}
