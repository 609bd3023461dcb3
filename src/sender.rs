// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Sender` (spec §4.4): drives one batch through `PutLogEvents`,
//! classifying errors, recovering missing targets, and scheduling retries
//! either inline (single-concurrency) or via the `RetryHeap` (pooled mode).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{error, warn};

use crate::batch::Batch;
use crate::client::{UpstreamClient, UpstreamError};
use crate::config::PusherConfig;
use crate::queue::BatchHandoff;
use crate::retry_heap::{RetryConsumer, RetryHeap};
use crate::retry_policy::{self, RetryFamily};
use crate::stats::Stats;
use crate::target_manager::TargetManager;

/// Executes `PutLogEvents` for one batch at a time, retrying according to
/// `RetryWaitPolicy` (spec §4.4).
pub struct Sender {
    client: Arc<dyn UpstreamClient>,
    target_manager: Arc<TargetManager>,
    config: Arc<PusherConfig>,
    stats: Arc<dyn Stats>,
    retry_heap: Option<Arc<RetryHeap>>,
    stop_notify: tokio::sync::Notify,
    stopped: AtomicBool,
}

impl Sender {
    #[must_use]
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        target_manager: Arc<TargetManager>,
        config: Arc<PusherConfig>,
        stats: Arc<dyn Stats>,
        retry_heap: Option<Arc<RetryHeap>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            target_manager,
            config,
            stats,
            retry_heap,
            stop_notify: tokio::sync::Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Drive `batch` through send/retry to completion (spec §4.4 steps
    /// 1-9). Consumes the batch either way: every exit path invokes
    /// `done()` or `state_update_only()` exactly once, except the "push to
    /// RetryHeap" path, which hands ownership to the heap.
    pub async fn send(&self, mut batch: Batch) {
        if batch.is_empty() {
            return;
        }
        if batch.start_time.is_none() {
            batch.start_time = Some(Instant::now());
        }

        let deadline = batch.start_time.unwrap() + self.config.max_retry_duration;

        loop {
            let request = batch.build();
            let family = match self.client.put_log_events(request).await {
                Ok(response) => {
                    if !response.rejected_info.is_empty() {
                        warn!(
                            "{}: PutLogEvents accepted with rejections: too_old_end={:?} too_new_start={:?} expired_end={:?}",
                            batch.target,
                            response.rejected_info.too_old_end_index,
                            response.rejected_info.too_new_start_index,
                            response.rejected_info.expired_end_index,
                        );
                    }
                    batch.done();
                    return;
                }
                Err(err) => match self.handle_error(&batch, err).await {
                    ErrorOutcome::Terminal => {
                        batch.state_update_only();
                        return;
                    }
                    ErrorOutcome::Retry(family) => family,
                },
            };

            // Step 7: compute wait and check the deadline.
            let count = match family {
                RetryFamily::Short => {
                    let n = batch.retry_count_short;
                    batch.retry_count_short += 1;
                    n
                }
                RetryFamily::Long => {
                    let n = batch.retry_count_long;
                    batch.retry_count_long += 1;
                    n
                }
            };
            let wait = retry_policy::wait_duration(family, count);

            if Instant::now() + wait > deadline {
                error!(
                    "{}: all retries failed after {} short / {} long attempts, giving up",
                    batch.target, batch.retry_count_short, batch.retry_count_long
                );
                batch.state_update_only();
                return;
            }

            if let Some(heap) = &self.retry_heap {
                batch.next_retry_time = Some(Instant::now() + wait);
                if let Err((e, batch)) = heap.push(batch).await {
                    warn!("{}: {e}, giving up", batch.target);
                    batch.state_update_only();
                }
                return;
            }

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.stop_notify.notified() => {
                    warn!("{}: stop requested during retry wait", batch.target);
                    batch.state_update_only();
                    return;
                }
            }
            if self.stopped.load(Ordering::SeqCst) {
                batch.state_update_only();
                return;
            }
        }
    }

    /// Classify and act on one `PutLogEvents` error (spec §4.4 steps 5-6).
    async fn handle_error(&self, batch: &Batch, err: UpstreamError) -> ErrorOutcome {
        match &err {
            UpstreamError::Unknown(msg) => {
                error!("{}: non-upstream error, not retrying: {msg}", batch.target);
                ErrorOutcome::Terminal
            }
            UpstreamError::ResourceNotFound(_) => {
                warn!("{}: target missing, reinitializing", batch.target);
                if let Err(e) = self.target_manager.init_target(&batch.target).await {
                    warn!("{}", crate::error::display_chain(&e));
                }
                self.stats.add_stats("sendRetry", 1);
                ErrorOutcome::Retry(retry_policy::classify(&err))
            }
            UpstreamError::InvalidParameter(msg) => {
                error!("{}: invalid parameter, not retrying: {msg}", batch.target);
                ErrorOutcome::Terminal
            }
            UpstreamError::DataAlreadyAccepted(msg) => {
                warn!("{}: data already accepted: {msg}", batch.target);
                ErrorOutcome::Terminal
            }
            other => {
                warn!("{}: {} ({}), will retry", batch.target, other, other.kind_name());
                self.stats.add_stats("sendRetry", 1);
                ErrorOutcome::Retry(retry_policy::classify(&err))
            }
        }
    }
}

enum ErrorOutcome {
    Terminal,
    Retry(RetryFamily),
}

#[async_trait]
impl BatchHandoff for Sender {
    async fn handoff(&self, batch: Batch) {
        self.send(batch).await;
    }
}

#[async_trait]
impl RetryConsumer for Sender {
    async fn retry(&self, batch: Batch) {
        self.send(batch).await;
    }
}

/// Wraps a `Sender` so batches are submitted to a `WorkerPool` instead of
/// being sent inline (spec §4.8: "wraps the Sender in a pool-adapter").
pub struct PooledSender {
    sender: Arc<Sender>,
    pool: Arc<crate::worker_pool::WorkerPool>,
}

impl PooledSender {
    #[must_use]
    pub fn new(sender: Arc<Sender>, pool: Arc<crate::worker_pool::WorkerPool>) -> Arc<Self> {
        Arc::new(Self { sender, pool })
    }
}

#[async_trait]
impl BatchHandoff for PooledSender {
    async fn handoff(&self, batch: Batch) {
        let sender = self.sender.clone();
        let target = batch.target.clone();
        // Unreachable under `Pusher::stop`'s ordering (the queue is fully
        // drained and stopped before the pool is), so this is a defensive
        // log for a caller invariant violation, not a normal exit path.
        if let Err(e) = self
            .pool
            .submit(move || Box::pin(async move { sender.send(batch).await }))
            .await
        {
            error!("{target}: worker pool stopped, batch dropped: {e}");
        }
    }
}
