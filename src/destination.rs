// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Destination` (spec §4.8): a reference-counted wrapper over one
//! `Pusher`, shared by every source publishing to the same target. Detects
//! EMF payloads and routes them through the non-blocking queue path.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::error;

use crate::config::PusherConfig;
use crate::event::LogEvent;
use crate::pusher::Pusher;

/// Substring CloudWatch Logs' EMF convention uses to mark a log message as
/// an embedded-metric payload (spec §4.8).
const EMF_MARKER: &str = "\"CloudWatchMetrics\"";

/// Invoked once `NotifySourceStopped` drops the refcount to zero, so the
/// owner can remove this destination from its lookup table (spec §4.8
/// `onStop`).
pub trait OnStop: Send + Sync {
    fn on_stop(&self);
}

pub struct Destination {
    pusher: Arc<Pusher>,
    ref_count: AtomicI64,
    is_emf: AtomicBool,
    stopped: AtomicBool,
    on_stop: Arc<dyn OnStop>,
    limits: crate::config::WireLimits,
}

impl Destination {
    #[must_use]
    pub fn new(pusher: Arc<Pusher>, config: &PusherConfig, on_stop: Arc<dyn OnStop>) -> Arc<Self> {
        Arc::new(Self {
            pusher,
            ref_count: AtomicI64::new(1),
            is_emf: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            on_stop,
            limits: config.wire_limits,
        })
    }

    /// Add one more source referencing this destination.
    pub fn add_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Publish a batch of events from one source. Latches `isEMF` the first
    /// time any message carries the EMF marker, then routes every future
    /// call through the non-blocking (drop-on-overflow) path (spec §4.8).
    pub async fn publish(
        &self,
        events: Vec<Box<dyn LogEvent>>,
        stats: &dyn crate::stats::Stats,
    ) -> Result<(), crate::error::PusherError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(crate::error::PusherError::ErrOutputStopped);
        }
        if !self.is_emf.load(Ordering::SeqCst) && events.iter().any(|e| e.message().contains(EMF_MARKER)) {
            self.is_emf.store(true, Ordering::SeqCst);
        }

        let emf = self.is_emf.load(Ordering::SeqCst);
        for event in events {
            if emf {
                self.pusher.queue().add_event_non_blocking(event, &self.limits, stats);
            } else {
                self.pusher.queue().add_event(event, &self.limits).await;
            }
        }
        Ok(())
    }

    /// Decrement the refcount; once it reaches zero, stop the underlying
    /// `Pusher` and invoke `on_stop` (spec §4.8). A refcount that goes
    /// negative indicates a caller bug: clamp at zero and log it.
    pub async fn notify_source_stopped(&self) {
        let prev = self.ref_count.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            error!("Destination refcount went negative; clamping (caller called NotifySourceStopped too many times)");
            self.ref_count.store(0, Ordering::SeqCst);
            return;
        }
        if prev == 1 {
            self.stopped.store(true, Ordering::SeqCst);
            self.pusher.stop().await;
            self.on_stop.on_stop();
        }
    }

    #[must_use]
    pub fn is_emf(&self) -> bool {
        self.is_emf.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }
}
