//! Bounded write error type.

use std::io;
use std::time::Duration;

/// Failure of a single bounded write. Every variant is fatal for the transfer
/// the write belongs to: the sink may hold a partial frame.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The write did not finish before the deadline. The call may still be
    /// running on the writer thread.
    #[error("write of {len} bytes did not complete within {deadline:?}")]
    TimedOut { len: usize, deadline: Duration },
    /// The sink reported an error.
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    /// An earlier write on the same sink failed; no further writes are attempted.
    #[error("transfer aborted after an earlier write failure")]
    Aborted,
    /// The writer thread went away without answering (it panicked).
    #[error("writer thread exited before reporting a result")]
    WriterGone,
}

impl WriteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WriteError::TimedOut { .. })
    }
}

impl From<WriteError> for io::Error {
    fn from(e: WriteError) -> Self {
        let kind = match &e {
            WriteError::Io(inner) => inner.kind(),
            WriteError::TimedOut { .. } => io::ErrorKind::TimedOut,
            WriteError::Aborted | WriteError::WriterGone => io::ErrorKind::BrokenPipe,
        };
        match e {
            WriteError::Io(inner) => inner,
            other => io::Error::new(kind, other.to_string()),
        }
    }
}
