//! Persistent tier: one file per key, named by the SHA-256 of the key.
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so readers never see a partial entry. Each write is bounded by a deadline;
//! a write that hangs (e.g. a dead network filesystem) is abandoned and the
//! temp file is discarded.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::write::BoundedWrite;

/// File whose `flush` is an `fsync`.
struct Durable(fs::File);

impl Write for Durable {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.sync_all()
    }
}

pub struct DiskTier {
    dir: PathBuf,
    write_timeout: Option<Duration>,
}

impl DiskTier {
    /// Create the directory if needed. `write_timeout: None` writes inline.
    pub fn open(dir: impl Into<PathBuf>, write_timeout: Option<Duration>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;
        Ok(Self { dir, write_timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// `Ok(None)` when the key has no file.
    pub fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically replace the file for `key`.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        let file = tmp.as_file().try_clone().context("failed to clone temp file handle")?;

        // The flush syncs to disk, so the rename below never exposes a short file.
        let out = BoundedWrite::new(Durable(file), self.write_timeout).context("failed to start writer")?;
        out.write(bytes).context("cache write")?;
        out.flush().context("cache flush")?;
        out.into_inner().context("cache writer")?;

        let path = self.path_for(key);
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to finalize {}", path.display()))?;
        Ok(())
    }

    /// Remove every entry file. The directory itself stays.
    pub fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
