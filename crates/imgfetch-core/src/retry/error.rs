//! Fetch attempt error type for retry classification.

use std::fmt;

use crate::decode::DecodeError;
use crate::transport::TransportError;

/// Error returned by a single fetch attempt (retrieval or decode).
/// Used so we can classify and decide retries before reporting a failure.
#[derive(Debug)]
pub enum FetchError {
    /// The transport failed to deliver the body (connect, read, HTTP status).
    Transport(TransportError),
    /// Bytes were retrieved but could not be decoded or scaled.
    Decode(DecodeError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "{}", e),
            FetchError::Decode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Transport(e) => Some(e),
            FetchError::Decode(e) => Some(e),
        }
    }
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        FetchError::Transport(e)
    }
}

impl From<DecodeError> for FetchError {
    fn from(e: DecodeError) -> Self {
        FetchError::Decode(e)
    }
}
