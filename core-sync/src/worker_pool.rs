//! # Worker Pool
//!
//! Bounded-concurrency executor for per-item sync tasks.
//!
//! ## Overview
//!
//! A fixed number of workers drain a bounded queue of capacity `2 × workers`.
//! Submitting into a full queue waits, which throttles page fetching to the
//! speed of the store.
//!
//! - [`WorkerPool::submit`] enqueues, waiting for space; it gives up with
//!   [`PoolError::Cancelled`] once the pool's token fires
//! - [`WorkerPool::wait`] stops accepting work, drains the queue and joins
//!   the workers
//! - [`WorkerPool::shutdown`] fires the token: workers finish the task in
//!   hand and stop dequeuing; whatever is still queued is counted as dropped
//!
//! A task that returns `Err` or panics is logged and counted as failed; the
//! other tasks and the pool are unaffected.
//!
//! ## Architecture
//!
//! ```text
//!  submit ──► mpsc (2W) ──► worker 1 ──► tokio::spawn(task)
//!                       ├─► worker 2 ──► tokio::spawn(task)
//!                       └─► worker W ──► tokio::spawn(task)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let pool = WorkerPool::new(4, cancel.child_token());
//! for item in items {
//!     pool.submit(async move { store(item).await }).await?;
//! }
//! let stats = pool.wait().await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Unit of work run by the pool
pub type Task = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool cancelled")]
    Cancelled,

    #[error("Worker pool no longer accepts tasks")]
    Closed,
}

/// Task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted into the queue
    pub submitted: u64,
    /// Tasks that ran to `Ok`
    pub completed: u64,
    /// Tasks that returned `Err` or panicked
    pub failed: u64,
    /// Tasks rejected on cancellation or left in the queue at shutdown
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size pool of async workers over a bounded queue
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WorkerPool {
    /// Start `workers` workers (at least one) bound to `cancel`
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let capacity = workers * 2;
        let (sender, receiver) = mpsc::channel::<Task>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    counters.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        debug!(workers, capacity, "Worker pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(handles),
            counters,
            cancel,
            capacity,
        }
    }

    /// Queue capacity (twice the worker count)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a task, waiting while the queue is full
    ///
    /// # Errors
    ///
    /// - [`PoolError::Cancelled`] if the pool's token fired before or while
    ///   waiting; the task is dropped
    /// - [`PoolError::Closed`] if [`WorkerPool::wait`] already began
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(self.reject());
        }

        let sender = match lock(&self.sender).as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(PoolError::Closed),
        };

        let task: Task = Box::pin(task);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.reject()),
            sent = sender.send(task) => match sent {
                Ok(()) => {
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(_) => Err(PoolError::Closed),
            },
        }
    }

    /// Stop accepting tasks, run everything queued, and join the workers
    pub async fn wait(&self) -> PoolStats {
        lock(&self.sender).take();

        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker terminated abnormally");
            }
        }

        // Only non-empty when cancellation stopped the workers early
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut left = 0u64;
        while receiver.try_recv().is_ok() {
            left += 1;
        }
        if left > 0 {
            self.counters.dropped.fetch_add(left, Ordering::Relaxed);
            warn!(dropped = left, "Queued tasks dropped at shutdown");
        }

        let stats = self.stats();
        debug!(?stats, "Worker pool drained");
        stats
    }

    /// Cancel the pool, let running tasks finish, and join the workers
    pub async fn shutdown(&self) -> PoolStats {
        self.cancel.cancel();
        self.wait().await
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    fn reject(&self) -> PoolError {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("Worker pool cancelled, dropping task");
        PoolError::Cancelled
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = receiver.recv() => task,
            }
        };

        let Some(task) = task else {
            break;
        };

        // A spawned task turns a panic into a JoinError instead of killing the worker.
        match tokio::spawn(task).await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, error = %e, "Task failed");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker_id, error = %e, "Task panicked");
            }
        }
    }

    debug!(worker_id, "Worker stopped");
}
