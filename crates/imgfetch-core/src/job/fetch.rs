//! Single retrieval attempt: open, read the whole body, close.

use bytes::Bytes;
use std::io::Read;

use crate::transport::{Response, Transport, TransportError};

/// Upper bound on a buffer pre-sized from a declared length. Larger bodies
/// still load, the buffer just grows as data arrives.
const MAX_PRESIZE: u64 = 64 * 1024 * 1024;

/// Read the full body for `key` into memory.
///
/// The buffer is sized from the declared content length when there is one,
/// else `default_buffer_size`. A body shorter than its declared length is an
/// error, never a partial result.
pub fn retrieve(
    transport: &dyn Transport,
    key: &str,
    default_buffer_size: usize,
) -> Result<Bytes, TransportError> {
    let Response {
        mut body,
        content_length,
    } = transport.open(key)?;

    let capacity = match content_length {
        Some(len) => len.min(MAX_PRESIZE) as usize,
        None => default_buffer_size,
    };
    let mut buf = Vec::with_capacity(capacity);
    body.read_to_end(&mut buf)?;
    drop(body);

    let received = buf.len() as u64;
    if let Some(expected) = content_length {
        if received < expected {
            return Err(TransportError::ShortBody { expected, received });
        }
    }
    tracing::debug!(key, received, declared = ?content_length, "body read");
    Ok(Bytes::from(buf))
}
