// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `Converter` (spec §4.1): turns a source `LogEvent` into a batch-ready
//! `ConvertedEvent`, assigning a timestamp and preserving progress-tracking
//! state. Stateful only in the three timestamps it tracks across calls.

use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use log::warn;

use crate::config::PusherConfig;
use crate::event::{ConvertedEvent, ConvertedRangeState, LogEvent};

struct ConverterState {
    last_valid_time: Option<SystemTime>,
    last_update_time: Option<SystemTime>,
    last_warn_message: Option<SystemTime>,
}

/// Stateless across targets except for the three timestamps tracked here
/// (spec §4.1).
pub struct Converter {
    state: Mutex<ConverterState>,
    target_label: String,
    warn_old_timestamp: Duration,
    warn_old_timestamp_interval: Duration,
}

impl Converter {
    #[must_use]
    pub fn new(target_label: impl Into<String>, config: &PusherConfig) -> Self {
        Self {
            state: Mutex::new(ConverterState {
                last_valid_time: None,
                last_update_time: None,
                last_warn_message: None,
            }),
            target_label: target_label.into(),
            warn_old_timestamp: config.warn_old_timestamp,
            warn_old_timestamp_interval: config.warn_old_timestamp_interval,
        }
    }

    /// Convert one source event. `per_event_header_bytes` is threaded in
    /// from `WireLimits` so the cached `event_bytes` matches whatever the
    /// batch layer will account against (spec §3 `ConvertedEvent`).
    pub fn convert(&self, event: Box<dyn LogEvent>, per_event_header_bytes: usize) -> ConvertedEvent {
        let now = SystemTime::now();
        let timestamp = self.resolve_timestamp(event.time(), now);
        let message = event.message().to_owned();
        let event_bytes = message.len() + per_event_header_bytes;

        let range = event.range();
        let range_queue = event.range_queue();

        let (done_callback, range_state) = match (range, range_queue) {
            (Some(range), Some(range_queue)) => (None, Some(ConvertedRangeState { range, range_queue })),
            _ => (Some(Box::new(move || event.done()) as Box<dyn FnOnce() + Send>), None),
        };

        ConvertedEvent {
            timestamp_ms: system_time_to_millis(timestamp),
            message,
            event_bytes,
            done_callback,
            range_state,
        }
    }

    fn resolve_timestamp(&self, source_time: Option<SystemTime>, now: SystemTime) -> SystemTime {
        let mut state = self.state.lock().unwrap();

        if let Some(t) = source_time {
            if t != SystemTime::UNIX_EPOCH {
                state.last_valid_time = Some(t);
                state.last_update_time = Some(now);
                state.last_warn_message = None;
                return t;
            }
        }

        if let Some(last_valid) = state.last_valid_time {
            let stale = state
                .last_update_time
                .map(|u| now.duration_since(u).unwrap_or_default() > self.warn_old_timestamp)
                .unwrap_or(false);
            let should_warn = stale
                && state
                    .last_warn_message
                    .map(|w| now.duration_since(w).unwrap_or_default() > self.warn_old_timestamp_interval)
                    .unwrap_or(true);
            if should_warn {
                warn!(
                    "target {}: source has not supplied a fresh timestamp in over {:?}; reusing last valid timestamp",
                    self.target_label, self.warn_old_timestamp
                );
                state.last_warn_message = Some(now);
            }
            return last_valid;
        }

        now
    }
}

fn system_time_to_millis(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
