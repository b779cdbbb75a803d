//! Deadline-guarded writer over an arbitrary blocking sink.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::WriteError;

enum Op {
    Write(Vec<u8>),
    Flush,
}

/// One unit of work handed to the writer thread. Owns its copy of the buffer so
/// the caller can return on timeout while the write is still in progress.
pub(crate) struct WriteTask {
    op: Op,
    reply: mpsc::SyncSender<io::Result<()>>,
}

enum Mode {
    /// No deadline: write on the caller's thread.
    Inline,
    Guarded {
        tasks: mpsc::Sender<WriteTask>,
        handle: JoinHandle<()>,
        deadline: Duration,
    },
}

/// Writes to `W` with an optional wall-clock deadline per call.
///
/// With a deadline, a single dedicated thread performs the writes in submission
/// order (never the fetch worker pool, so a hung sink cannot starve fetches).
/// Without one, writes happen inline and behave like a plain `write_all`.
///
/// After any failure the writer refuses further writes with
/// [`WriteError::Aborted`]: the sink is in an unknown framing state and the
/// caller must abandon the whole transfer.
pub struct BoundedWrite<W> {
    sink: Arc<Mutex<W>>,
    mode: Mode,
    failed: AtomicBool,
}

fn lock_sink<W>(sink: &Mutex<W>) -> MutexGuard<'_, W> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<W: Write + Send + 'static> BoundedWrite<W> {
    /// Wrap `sink`. `deadline: None` gives the unguarded variant.
    pub fn new(sink: W, deadline: Option<Duration>) -> io::Result<Self> {
        let sink = Arc::new(Mutex::new(sink));
        let mode = match deadline {
            None => Mode::Inline,
            Some(deadline) => {
                let (tasks, handle) = spawn_writer(Arc::clone(&sink))?;
                Mode::Guarded {
                    tasks,
                    handle,
                    deadline,
                }
            }
        };
        Ok(Self {
            sink,
            mode,
            failed: AtomicBool::new(false),
        })
    }

    pub fn deadline(&self) -> Option<Duration> {
        match &self.mode {
            Mode::Inline => None,
            Mode::Guarded { deadline, .. } => Some(*deadline),
        }
    }

    /// True once a write or flush has failed.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Write all of `buf`, or fail within the deadline.
    pub fn write(&self, buf: &[u8]) -> Result<(), WriteError> {
        self.check_usable()?;
        let res = match &self.mode {
            Mode::Inline => lock_sink(&self.sink).write_all(buf).map_err(WriteError::Io),
            Mode::Guarded {
                tasks, deadline, ..
            } => submit(tasks, Op::Write(buf.to_vec()), buf.len(), *deadline),
        };
        self.record(res)
    }

    /// Flush the sink under the same deadline as writes.
    pub fn flush(&self) -> Result<(), WriteError> {
        self.check_usable()?;
        let res = match &self.mode {
            Mode::Inline => lock_sink(&self.sink).flush().map_err(WriteError::Io),
            Mode::Guarded {
                tasks, deadline, ..
            } => submit(tasks, Op::Flush, 0, *deadline),
        };
        self.record(res)
    }

    /// Stop the writer thread and return the sink.
    ///
    /// Fails with [`WriteError::Aborted`] after an earlier failure, since a
    /// zombie write may still own the sink.
    pub fn into_inner(self) -> Result<W, WriteError> {
        if self.is_failed() {
            return Err(WriteError::Aborted);
        }
        if let Mode::Guarded { tasks, handle, .. } = self.mode {
            drop(tasks);
            handle.join().map_err(|_| WriteError::WriterGone)?;
        }
        match Arc::try_unwrap(self.sink) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|p| p.into_inner())),
            Err(_) => Err(WriteError::WriterGone),
        }
    }

    fn check_usable(&self) -> Result<(), WriteError> {
        if self.is_failed() {
            return Err(WriteError::Aborted);
        }
        Ok(())
    }

    fn record(&self, res: Result<(), WriteError>) -> Result<(), WriteError> {
        if res.is_err() {
            self.failed.store(true, Ordering::Release);
        }
        res
    }
}

fn spawn_writer<W: Write + Send + 'static>(
    sink: Arc<Mutex<W>>,
) -> io::Result<(mpsc::Sender<WriteTask>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<WriteTask>();
    let handle = thread::Builder::new()
        .name("bounded-write".into())
        .spawn(move || {
            for task in rx {
                let res = {
                    let mut sink = lock_sink(&sink);
                    match &task.op {
                        Op::Write(buf) => sink.write_all(buf),
                        Op::Flush => sink.flush(),
                    }
                };
                // The caller may have given up already; nobody is listening then.
                let _ = task.reply.send(res);
            }
        })?;
    Ok((tx, handle))
}

fn submit(
    tasks: &mpsc::Sender<WriteTask>,
    op: Op,
    len: usize,
    deadline: Duration,
) -> Result<(), WriteError> {
    let (reply, result) = mpsc::sync_channel(1);
    tasks
        .send(WriteTask { op, reply })
        .map_err(|_| WriteError::WriterGone)?;

    let started = Instant::now();
    match result.recv_timeout(deadline) {
        Ok(Ok(())) => {
            tracing::debug!(
                len,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "bounded write completed"
            );
            Ok(())
        }
        Ok(Err(e)) => Err(WriteError::Io(e)),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                len,
                deadline_ms = deadline.as_millis() as u64,
                "write exceeded deadline; writer thread left running"
            );
            Err(WriteError::TimedOut { len, deadline })
        }
        Err(RecvTimeoutError::Disconnected) => Err(WriteError::WriterGone),
    }
}
