// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Batch` (spec §4.2): the accumulator of events for one target, honoring
//! every wire-format limit, carrying per-event completion callbacks and
//! per-source progress sub-batchers.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::{PutLogEventsRequest, WireEvent};
use crate::config::WireLimits;
use crate::event::{ConvertedEvent, RangeQueueId};
use crate::target::Target;

struct RangeSubBatcher {
    range_queue: Arc<dyn RangeQueueId>,
    merged: Option<Range<u64>>,
}

impl RangeSubBatcher {
    fn merge(&mut self, r: Range<u64>) {
        self.merged = Some(match self.merged.take() {
            Some(existing) => existing.start.min(r.start)..existing.end.max(r.end),
            None => r,
        });
    }

    /// Fires the range queue's `done` hook exactly once with the merged
    /// span accepted (or discarded) for this batch (spec §3, §7
    /// "state-update").
    fn fire(self) {
        if let Some(range) = self.merged {
            self.range_queue.done(range);
        }
    }
}

/// One appended event's committed position inside the batch, used only to
/// detect out-of-order appends for `needs_sort`.
struct AppendedEvent {
    wire: WireEvent,
    done_callback: Option<Box<dyn FnOnce() + Send>>,
}

/// Bound to a `Target`; accumulates events until it is sent or handed to
/// the retry heap (spec §4.2, §3).
pub struct Batch {
    pub target: Target,
    events: Vec<AppendedEvent>,
    buffered_size: usize,
    min_t: Option<i64>,
    max_t: Option<i64>,
    needs_sort: bool,
    range_batchers: HashMap<u64, RangeSubBatcher>,
    entity: Option<Arc<dyn crate::event::Entity>>,

    /// First send attempt for this batch; `None` until `Sender` records it.
    pub start_time: Option<Instant>,
    pub next_retry_time: Option<Instant>,
    pub retry_count_short: u32,
    pub retry_count_long: u32,

    limits: WireLimits,
}

impl Batch {
    #[must_use]
    pub fn new(target: Target, limits: WireLimits) -> Self {
        Self {
            target,
            events: Vec::new(),
            buffered_size: 0,
            min_t: None,
            max_t: None,
            needs_sort: false,
            range_batchers: HashMap::new(),
            entity: None,
            start_time: None,
            next_retry_time: None,
            retry_count_short: 0,
            retry_count_long: 0,
            limits,
        }
    }

    #[must_use]
    pub fn with_entity(mut self, entity: Option<Arc<dyn crate::event::Entity>>) -> Self {
        self.entity = entity;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn buffered_size(&self) -> usize {
        self.buffered_size
    }

    /// Read-only predicate: would appending an event with timestamp `t`
    /// keep every event within the 24-hour span? An empty batch always
    /// accepts (spec §4.2).
    #[must_use]
    pub fn in_time_range(&self, t: i64) -> bool {
        let span_ms = self.limits.max_request_time_span.as_millis() as i64;
        match (self.min_t, self.max_t) {
            (Some(min_t), Some(max_t)) => (t - min_t) <= span_ms && (max_t - t) <= span_ms,
            _ => true,
        }
    }

    /// Read-only predicate: would appending an event of `event_bytes` keep
    /// the batch under the byte and count budgets?
    #[must_use]
    pub fn has_space(&self, event_bytes: usize) -> bool {
        self.events.len() < self.limits.max_events_per_request
            && self.buffered_size + event_bytes <= self.limits.max_request_bytes
    }

    /// Append a converted event. Callers must have already checked
    /// `in_time_range`/`has_space`; this method does not re-validate them
    /// (spec §4.2: "invoked only after both returned true").
    pub fn append(&mut self, event: ConvertedEvent) {
        if let Some(last) = self.max_t {
            if event.timestamp_ms < last {
                self.needs_sort = true;
            }
        }
        if let Some(first) = self.min_t {
            if event.timestamp_ms < first {
                self.needs_sort = true;
            }
        }

        self.min_t = Some(self.min_t.map_or(event.timestamp_ms, |m| m.min(event.timestamp_ms)));
        self.max_t = Some(self.max_t.map_or(event.timestamp_ms, |m| m.max(event.timestamp_ms)));
        self.buffered_size += event.event_bytes;

        let done_callback = match event.range_state {
            Some(state) => {
                self.range_batchers
                    .entry(state.range_queue.id())
                    .or_insert_with(|| RangeSubBatcher {
                        range_queue: state.range_queue,
                        merged: None,
                    })
                    .merge(state.range);
                None
            }
            None => event.done_callback,
        };

        self.events.push(AppendedEvent {
            wire: WireEvent {
                timestamp_ms: event.timestamp_ms,
                message: event.message,
            },
            done_callback,
        });
    }

    /// Build the upstream request: stable-sorts by timestamp if any append
    /// was out-of-order, attaches the entity if present (spec §4.2, §9).
    #[must_use]
    pub fn build(&mut self) -> PutLogEventsRequest {
        if self.needs_sort {
            self.events.sort_by_key(|e| e.wire.timestamp_ms);
            self.needs_sort = false;
        }
        PutLogEventsRequest {
            target: self.target.clone(),
            events: self.events.iter().map(|e| e.wire.clone()).collect(),
            entity: self.entity.as_ref().map(|e| e.to_wire()),
        }
    }

    /// Fire every `doneCallback` in LIFO registration order, and every
    /// range sub-batcher's `done` hook with its merged span (spec §3, §4.2).
    /// Consumes the batch: it is destroyed by send either way (spec §3
    /// Lifecycle).
    pub fn done(self) {
        for event in self.events.into_iter().rev() {
            if let Some(cb) = event.done_callback {
                cb();
            }
        }
        for (_, batcher) in self.range_batchers {
            batcher.fire();
        }
    }

    /// Same as `done`, but used on the drop/terminal path: regular
    /// `doneCallback`s are *not* invoked, but progress ranges still advance
    /// so a poison payload does not stall the source forever (spec §7
    /// "state-update").
    pub fn state_update_only(self) {
        for (_, batcher) in self.range_batchers {
            batcher.fire();
        }
    }

    /// Whether this batch has exceeded its retry deadline, given `now` and
    /// the configured `max_retry_duration` (spec §4.4 step 7, §8 "Retry
    /// deadline").
    #[must_use]
    pub fn retry_deadline_exceeded(&self, now: Instant, max_retry_duration: Duration) -> bool {
        match self.start_time {
            Some(start) => now.saturating_duration_since(start) > max_retry_duration,
            None => false,
        }
    }
}
