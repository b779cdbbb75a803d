//! Classify transport, HTTP and decode errors into retry policy error kinds.

use crate::decode::DecodeError;
use crate::retry::error::FetchError;
use crate::retry::policy::ErrorKind;
use crate::transport::TransportError;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    ErrorKind::Http(u16::try_from(code).unwrap_or(u16::MAX))
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

fn classify_io_error(e: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match e.kind() {
        Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
        _ => ErrorKind::Connection,
    }
}

/// Classify a fetch attempt error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::Transport(t) => match t {
            TransportError::Curl(ce) => classify_curl_error(ce),
            TransportError::Http(code) => classify_http_status(*code),
            TransportError::Io(io) => classify_io_error(io),
            TransportError::ShortBody { .. } => ErrorKind::Connection,
            TransportError::InvalidUrl { .. } => ErrorKind::Other,
        },
        FetchError::Decode(DecodeError::Malformed(_)) => ErrorKind::Decode,
        FetchError::Decode(DecodeError::OutOfMemory(_)) => ErrorKind::OutOfMemory,
        FetchError::Decode(DecodeError::ScaleExhausted(_)) => ErrorKind::ScaleExhausted,
    }
}
