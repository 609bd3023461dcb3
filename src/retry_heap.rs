// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `RetryHeap` + its processor (spec §4.6): a bounded, time-ordered
//! priority queue of batches awaiting their next retry attempt, drained by
//! a dedicated 100ms-tick processor that hands ready batches back to a
//! `Sender`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;
use tokio::sync::Semaphore;

use crate::batch::Batch;

/// Consumes a batch popped off the retry heap once it's due (spec §4.6:
/// "hands the batch to the `Sender` for another attempt"). Implemented by
/// `Sender`.
#[async_trait]
pub trait RetryConsumer: Send + Sync {
    async fn retry(&self, batch: Batch);
}

struct HeapEntry {
    next_retry_time: Instant,
    batch: Batch,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_retry_time == other.next_retry_time
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts
        // to the top.
        other.next_retry_time.cmp(&self.next_retry_time)
    }
}

/// Bounded min-heap of batches waiting to be retried, ordered by
/// `next_retry_time` (spec §4.6). Capacity is enforced with a semaphore so
/// a full heap backpressures the `Sender` that tries to push into it,
/// rather than growing unbounded.
pub struct RetryHeap {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    capacity: Arc<Semaphore>,
}

impl RetryHeap {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(BinaryHeap::new()),
            capacity: Arc::new(Semaphore::new(capacity.max(1))),
        })
    }

    /// Reserve a capacity slot and push the batch. Blocks the caller until
    /// a slot is free (spec §4.6: the heap is bounded; a `Sender` that
    /// cannot get a slot waits rather than dropping the batch) or until
    /// `stop` closes the heap, in which case `batch` is handed back to the
    /// caller alongside the error so its progress state can still advance.
    pub async fn push(self: &Arc<Self>, batch: Batch) -> Result<(), (crate::error::PusherError, Batch)> {
        let permit = match self.capacity.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err((crate::error::PusherError::RetryHeapStopped, batch)),
        };
        let next_retry_time = batch.next_retry_time.unwrap_or_else(Instant::now);
        self.heap.lock().unwrap().push(HeapEntry { next_retry_time, batch });
        // Forget the permit rather than storing it: the slot it reserves
        // is released explicitly in `pop_ready` once the entry it guards
        // actually leaves the heap.
        permit.forget();
        Ok(())
    }

    /// Release every pusher currently blocked in `push`, and fail all future
    /// pushes immediately (spec §3/§5/§8: "stopping the heap releases
    /// blocked pushers"). Idempotent.
    pub fn stop(&self) {
        self.capacity.close();
    }

    /// Pop every batch whose `next_retry_time` has elapsed, releasing one
    /// capacity slot per batch popped.
    pub fn pop_ready(&self, now: Instant) -> Vec<Batch> {
        let mut heap = self.heap.lock().unwrap();
        let mut ready = Vec::new();
        while let Some(top) = heap.peek() {
            if top.next_retry_time > now {
                break;
            }
            let entry = heap.pop().expect("just peeked");
            self.capacity.add_permits(1);
            ready.push(entry.batch);
        }
        ready
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains a `RetryHeap` on a fixed tick, handing each ready batch to a
/// `RetryConsumer` (spec §4.6: "ticks every 100ms").
pub struct RetryProcessor {
    stop_tx: tokio::sync::watch::Sender<bool>,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RetryProcessor {
    const TICK: Duration = Duration::from_millis(100);

    #[must_use]
    pub fn start(heap: Arc<RetryHeap>, consumer: Arc<dyn RetryConsumer>) -> Arc<Self> {
        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::TICK);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let ready = heap.pop_ready(Instant::now());
                        for batch in ready {
                            consumer.retry(batch).await;
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Arc::new(Self {
            stop_tx,
            join: Mutex::new(Some(join)),
        })
    }

    pub async fn stop(&self) {
        if self.stop_tx.send(true).is_err() {
            warn!("RetryProcessor already stopped");
        }
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.await;
        }
    }
}
