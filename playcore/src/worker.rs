//! Command worker pool
//!
//! A fixed set of named threads draining a bounded job queue. Commands that
//! block (subprocesses, waiting on hooks) run here so the core lock is only
//! held for the parts of the handler that touch session state.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::error::PoolError;

/// A unit of work executed on a pool thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with a bounded queue
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers sharing a queue of `capacity` jobs
    pub fn new(threads: usize, capacity: usize) -> Result<Self, PoolError> {
        let (tx, rx) = channel::bounded::<Job>(capacity);
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("playcore-worker-{}", index))
                .spawn(move || {
                    tracing::debug!("Worker {} started", index);
                    for job in rx.iter() {
                        job();
                    }
                    tracing::debug!("Worker {} shut down", index);
                })
                .map_err(|e| PoolError::Spawn(e.to_string()))?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            threads: handles,
        })
    }

    /// Queue a job without blocking
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let tx = self.tx.as_ref().ok_or(PoolError::ShutDown)?;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::QueueFull,
            TrySendError::Disconnected(_) => PoolError::ShutDown,
        })
    }

    /// Number of jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue ends each worker loop once it drains
        self.tx.take();
        let current = thread::current().id();
        for handle in self.threads.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("Worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads.len())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_named_threads() {
        let pool = WorkerPool::new(2, 8).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(name.starts_with("playcore-worker-"));
    }

    #[test]
    fn test_full_queue_is_rejected() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        // Occupy the only worker
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // Fill the single queue slot
        pool.submit(Box::new(|| {})).unwrap();

        assert_eq!(pool.submit(Box::new(|| {})), Err(PoolError::QueueFull));
        block_tx.send(()).unwrap();
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(2, 16).unwrap();
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
