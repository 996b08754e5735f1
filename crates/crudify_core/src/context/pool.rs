//! Dedicated worker pool of one operation.

use crate::error::{CrudError, CrudResult};
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named threads fed by one job queue.
///
/// Dropping the pool closes the queue and joins every worker.
pub struct WorkerPool {
    label: String,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) named `<label>-<n>`.
    pub fn new(label: &str, size: usize) -> CrudResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut pool = Self {
            label: label.to_string(),
            sender: Some(sender),
            workers: Vec::new(),
        };

        for index in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("{label}-{index}"))
                .spawn(move || worker_loop(&receiver))
                .map_err(|err| {
                    CrudError::internal("failed to spawn worker for {}")
                        .with_arg(label)
                        .with_source(err)
                })?;
            pool.workers.push(worker);
        }

        debug!(
            "event=pool_start module=context status=ok pool={} workers={}",
            pool.label,
            pool.workers.len()
        );
        Ok(pool)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs `job` on one of the pool's threads and waits for its result.
    ///
    /// # Errors
    /// - `Internal` when the pool is shut down or the job panicked.
    pub fn submit<R, F>(&self, job: F) -> CrudResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| CrudError::internal("worker pool {} is shut down").with_arg(&self.label))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = reply_tx.send(outcome);
        });
        sender
            .send(wrapped)
            .map_err(|_| CrudError::internal("worker pool {} is shut down").with_arg(&self.label))?;

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                error!(
                    "event=job_panicked module=context status=error pool={}",
                    self.label
                );
                Err(CrudError::internal("job panicked on {}").with_arg(&self.label))
            }
            Err(_) => Err(CrudError::internal("worker of {} dropped the job").with_arg(&self.label)),
        }
    }

    /// Closes the queue and joins every worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!(
            "event=pool_stop module=context status=ok pool={}",
            self.label
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let next = match receiver.lock() {
            Ok(queue) => queue.recv(),
            Err(_) => return,
        };
        match next {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}
