// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Pusher` (spec §4.8): the composition of `Queue` and `Sender` for one
//! target. Requests retention via `TargetManager` on construction, and
//! wires a `WorkerPool` + `RetryHeap` when `PusherConfig::concurrency > 1`.

use std::sync::Arc;

use crate::config::PusherConfig;
use crate::converter::Converter;
use crate::queue::{BatchHandoff, Queue};
use crate::retry_heap::{RetryHeap, RetryProcessor};
use crate::sender::{PooledSender, Sender};
use crate::stats::Stats;
use crate::target::Target;
use crate::target_manager::TargetManager;
use crate::worker_pool::WorkerPool;

enum Concurrency {
    Inline,
    Pooled {
        heap: Arc<RetryHeap>,
        pool: Arc<WorkerPool>,
        retry_processor: Arc<RetryProcessor>,
    },
}

/// One target's ingestion + send pipeline (spec §4.8).
pub struct Pusher {
    queue: Arc<Queue>,
    sender: Arc<Sender>,
    concurrency: Concurrency,
}

impl Pusher {
    pub async fn new(
        target: Target,
        config: Arc<PusherConfig>,
        client: Arc<dyn crate::client::UpstreamClient>,
        target_manager: Arc<TargetManager>,
        stats: Arc<dyn Stats>,
    ) -> Arc<Self> {
        Self::new_with_entity_provider(target, config, client, target_manager, stats, None).await
    }

    /// Same as `new`, but with an `EntityProvider` to attach to every
    /// request this target's batches build (spec §9 "Entity provider").
    pub async fn new_with_entity_provider(
        target: Target,
        config: Arc<PusherConfig>,
        client: Arc<dyn crate::client::UpstreamClient>,
        target_manager: Arc<TargetManager>,
        stats: Arc<dyn Stats>,
        entity_provider: Option<Arc<dyn crate::event::EntityProvider>>,
    ) -> Arc<Self> {
        target_manager.put_retention_policy(&target);

        let (retry_heap_for_sender, concurrency) = if config.concurrency > 1 {
            let heap = RetryHeap::new(config.effective_retry_heap_capacity());
            let pool = WorkerPool::start(config.concurrency);
            (Some(heap.clone()), Some((heap, pool)))
        } else {
            (None, None)
        };

        let sender = Sender::new(client, target_manager, config.clone(), stats.clone(), retry_heap_for_sender);

        let (concurrency, handoff): (Concurrency, Arc<dyn BatchHandoff>) = match concurrency {
            Some((heap, pool)) => {
                let retry_processor = RetryProcessor::start(heap.clone(), sender.clone());
                let pooled = PooledSender::new(sender.clone(), pool.clone());
                (Concurrency::Pooled { heap, pool, retry_processor }, pooled)
            }
            None => (Concurrency::Inline, sender.clone()),
        };

        let converter = Arc::new(Converter::new(target.to_string(), &config));
        let queue = Queue::start(target, config, converter, handoff, stats, entity_provider);

        Arc::new(Self { queue, sender, concurrency })
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Stop the queue (flushing any remaining batch), the sender, and the
    /// retry processor / worker pool if present (spec §4.8).
    pub async fn stop(&self) {
        self.queue.stop().await;
        self.sender.stop();
        if let Concurrency::Pooled { heap, pool, retry_processor } = &self.concurrency {
            retry_processor.stop().await;
            heap.stop();
            pool.stop().await;
        }
    }
}
