//! Bounded worker pool fed by a job queue.
//!
//! Jobs are queued with [`WorkerPool::submit`] and drained by a fixed number
//! of `tokio` tasks in [`WorkerPool::run_until_empty`]. The call returns only
//! after every worker has exited (join barrier), with results ordered by
//! submission index. A job that panics yields `None` and does not take its
//! worker down.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

type Job<T> = (usize, BoxFuture<'static, T>);

/// Outcome of a drained pool.
#[derive(Debug)]
pub struct PoolRun<T> {
    /// One slot per submitted job, in submission order.
    pub results: Vec<Option<T>>,
    pub workers: usize,
    pub jobs_submitted: usize,
    pub jobs_completed: usize,
}

pub struct WorkerPool<T> {
    worker_count: usize,
    queue: mpsc::UnboundedSender<Job<T>>,
    receiver: mpsc::UnboundedReceiver<Job<T>>,
    submitted: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// A pool with `worker_count` workers (at least one).
    pub fn new(worker_count: usize) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            worker_count: worker_count.max(1),
            queue,
            receiver,
            submitted: 0,
        }
    }

    /// Queue a job; returns its submission index.
    pub fn submit<F>(&mut self, job: F) -> usize
    where
        F: Future<Output = T> + Send + 'static,
    {
        let index = self.submitted;
        // The receiver lives in `self`, so the send cannot fail here.
        let _ = self.queue.send((index, job.boxed()));
        self.submitted += 1;
        index
    }

    pub fn len(&self) -> usize {
        self.submitted
    }

    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }

    /// Start the workers, drain the queue and tear the pool down.
    pub async fn run_until_empty(self) -> PoolRun<T> {
        let WorkerPool {
            worker_count,
            queue,
            receiver,
            submitted,
        } = self;
        drop(queue);

        let workers = worker_count.min(submitted);
        let receiver = Arc::new(Mutex::new(receiver));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, Option<T>)>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let receiver = Arc::clone(&receiver);
            let done = done_tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some((index, job)) = next else {
                        break;
                    };
                    debug!(worker, job = index, "Worker picked up job");
                    let outcome = AssertUnwindSafe(job).catch_unwind().await.ok();
                    if outcome.is_none() {
                        warn!(worker, job = index, "Job panicked");
                    }
                    let _ = done.send((index, outcome));
                }
            }));
        }
        drop(done_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        let mut results: Vec<Option<T>> = (0..submitted).map(|_| None).collect();
        while let Some((index, outcome)) = done_rx.recv().await {
            results[index] = outcome;
        }
        let jobs_completed = results.iter().filter(|r| r.is_some()).count();
        debug!(workers, submitted, completed = jobs_completed, "Worker pool drained");

        PoolRun {
            results,
            workers,
            jobs_submitted: submitted,
            jobs_completed,
        }
    }
}
