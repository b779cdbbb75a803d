//! Byte-stream retrieval for a resource key.
//!
//! The fetch job only needs "GET this URL, give me a stream and maybe a
//! length". [`CurlTransport`] is the default implementation; tests and
//! embedders plug in their own.

mod http;

pub use self::http::CurlTransport;

use std::fmt;
use std::io::{Cursor, Read};

/// Error from one retrieval attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{0}")]
    Curl(#[from] ::curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    /// Body ended before the declared length.
    #[error("short body: expected {expected} bytes, got {received}")]
    ShortBody { expected: u64, received: u64 },
}

/// An open response: the body stream and the declared length, if any.
pub struct Response {
    pub body: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

impl Response {
    pub fn new(body: impl Read + Send + 'static, content_length: Option<u64>) -> Self {
        Self {
            body: Box::new(body),
            content_length,
        }
    }

    /// In-memory response; `declare_length` controls whether the length is announced.
    pub fn from_bytes(bytes: Vec<u8>, declare_length: bool) -> Self {
        let len = bytes.len() as u64;
        Self::new(Cursor::new(bytes), declare_length.then_some(len))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens a readable stream for a key (URL). Must be callable from any worker thread.
pub trait Transport: Send + Sync {
    fn open(&self, key: &str) -> Result<Response, TransportError>;
}
