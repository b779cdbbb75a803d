//! Retry and backoff policy.
//!
//! This module encapsulates error classification (timeouts, connection
//! failures, HTTP errors, decode failures) and the fixed-delay backoff used
//! between download attempts, so the fetch job and its tests share one policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::FetchError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
