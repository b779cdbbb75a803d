//! Fixed-size pool of named worker threads fed from one task channel.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::job::panic_message;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted tasks on `size` threads, in submission order as workers free up.
///
/// A panicking task is logged and the worker keeps serving. Dropping the pool
/// (or calling [`shutdown`](Self::shutdown)) closes the queue, lets workers
/// drain what is already queued, and joins them.
pub struct WorkerPool {
    tasks: Option<mpsc::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `size` of zero is treated as one.
    pub fn new(size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("imgfetch-worker-{}", i))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        tracing::debug!(size, "worker pool started");
        Ok(Self {
            tasks: Some(tx),
            workers,
        })
    }

    /// Queue a task. Returns false if the pool no longer accepts work.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        match &self.tasks {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.tasks.take());
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::warn!(worker = %name, "worker thread exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let task = {
            let rx = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            rx.recv()
        };
        let Ok(task) = task else {
            break;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(panic = %panic_message(payload.as_ref()), "task panicked; worker continues");
        }
    }
}
