//! Multipart file-part body streaming.
//!
//! Field composition (boundaries, part headers) belongs to the HTTP layer; this
//! module only pushes a part's body through a [`BoundedWrite`] chunk by chunk,
//! so a stalled upload socket fails the part instead of hanging the uploader.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::write::{BoundedWrite, WriteError};

/// Chunk size used when reading a file part from disk.
pub const PART_CHUNK_SIZE: usize = 4 * 1024;

/// Stream `body` into `out` in chunks of `chunk_size` bytes, then flush.
/// Returns the number of bytes written.
///
/// The first failed chunk aborts the part; nothing is resumed or retried.
pub fn write_part_body<R, W>(
    out: &BoundedWrite<W>,
    mut body: R,
    chunk_size: usize,
) -> Result<u64, WriteError>
where
    R: Read,
    W: Write + Send + 'static,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WriteError::Io(e)),
        };
        out.write(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    tracing::debug!(bytes = total, "part body written");
    Ok(total)
}

/// Stream the file at `path` as a part body using [`PART_CHUNK_SIZE`] chunks.
pub fn write_file_part<W: Write + Send + 'static>(out: &BoundedWrite<W>, path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let written = write_part_body(out, file, PART_CHUNK_SIZE)
        .with_context(|| format!("upload of {} aborted", path.display()))?;
    Ok(written)
}
