// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `WorkerPool` (spec §4.5): a fixed-size pool of tasks draining a shared
//! channel, used to bound how many batches a `Pusher` sends concurrently
//! when `PusherConfig::concurrency > 1`.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PusherError;

type Job = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>;

/// Fixed-size worker pool. Submission blocks the caller when every worker is
/// busy and the channel is full (spec §4.5: "callers backpressure rather
/// than unbounded queueing").
///
/// `stop` takes `&self` rather than requiring sole ownership of the
/// surrounding `Arc`: every other component holding a clone (`PooledSender`,
/// `Queue`'s consumer task) keeps it alive, so stopping can't rely on
/// `Arc::try_unwrap` ever succeeding.
pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers draining a channel of capacity
    /// `2 * worker_count` (spec §4.5).
    #[must_use]
    pub fn start(worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Job>(worker_count * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => job().await,
                        None => break,
                    }
                }
            }));
        }

        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(Some(workers)),
        })
    }

    /// Submit a unit of work, backpressuring the caller if every worker is
    /// busy. Fails once the pool has been stopped.
    pub async fn submit<F>(&self, job: F) -> Result<(), PusherError>
    where
        F: FnOnce() -> futures::future::BoxFuture<'static, ()> + Send + 'static,
    {
        let tx = self.tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(Box::new(job)).await.map_err(|_| PusherError::Stopped),
            None => Err(PusherError::Stopped),
        }
    }

    /// Stop accepting new work and wait for in-flight jobs to finish (spec
    /// §4.5 "Stop"). Idempotent: a second call finds both `Mutex`es already
    /// emptied and returns immediately.
    pub async fn stop(&self) {
        self.tx.lock().unwrap().take();
        let workers = self.workers.lock().unwrap().take();
        if let Some(workers) = workers {
            for w in workers {
                let _ = w.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let pool = WorkerPool::start(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(move || {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .await
            .unwrap();
        }
        // give workers a chance to drain
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_jobs_with_outstanding_clones() {
        let pool = WorkerPool::start(2);
        let _kept_alive = pool.clone();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_for_job = flag.clone();
        pool.submit(move || {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                flag_for_job.store(true, Ordering::SeqCst);
            })
        })
        .await
        .unwrap();

        pool.stop().await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn submit_fails_after_stop() {
        let pool = WorkerPool::start(1);
        pool.stop().await;
        let result = pool.submit(|| Box::pin(async {})).await;
        assert!(matches!(result, Err(PusherError::Stopped)));
    }
}
