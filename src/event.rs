// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Source contract and converted-event data model (spec §3, §6 "Source
//! contract").

use std::ops::Range;
use std::time::SystemTime;

/// Identity of a source's progress-tracking sink. Sub-batchers in `Batch`
/// are keyed by this id (spec §4.2).
pub trait RangeQueueId: std::fmt::Debug + Send + Sync {
    fn id(&self) -> u64;

    /// Called once per batch this range queue contributed to, with the
    /// merged `[begin, end)` span that batch accepted or discarded. See
    /// spec §3 invariants ("each progress range is merged into exactly one
    /// sub-batcher per batch") and §7 ("state-update").
    fn done(&self, merged_range: Range<u64>);
}

/// An opaque value a log source exposes to the converter/batch layer.
/// Mirrors spec §3's `LogEvent`.
pub trait LogEvent: Send {
    fn message(&self) -> &str;

    /// Wall-clock instant for this event; `None` means "no timestamp
    /// supplied" (spec §4.1 calls this "zero").
    fn time(&self) -> Option<SystemTime>;

    /// Invoked exactly once when the event has been accepted by the
    /// upstream service, or dropped non-retryably. Consumes `self` so it
    /// cannot be called twice by construction.
    fn done(self: Box<Self>);

    /// Progress-tracking range this event occupies in its source's byte
    /// stream, if the source supports it.
    fn range(&self) -> Option<Range<u64>> {
        None
    }

    /// Identity of the range queue `range()` belongs to, if any. Returns an
    /// owned handle (rather than a borrow) so the converter can capture it
    /// independently of `self`, which is consumed by `done()`.
    fn range_queue(&self) -> Option<std::sync::Arc<dyn RangeQueueId>> {
        None
    }
}

/// Opaque provenance metadata attached to an upstream request at send time
/// (spec §9 "Entity provider"). The core never inspects its contents; it is
/// threaded through `Batch::build()` unchanged.
pub trait Entity: std::fmt::Debug + Send + Sync {
    /// Render this entity the way the upstream request wire format expects.
    /// Kept as an opaque JSON value since the concrete AWS `Entity` shape is
    /// owned by the collaborator layer, not this crate.
    fn to_wire(&self) -> serde_json::Value;
}

/// A source-supplied component that can produce the `Entity` to attach to
/// requests for its events, resolved once per `Pusher`/`Destination`
/// construction (spec §4.8, §9).
pub trait EntityProvider: Send + Sync {
    fn entity(&self) -> Option<std::sync::Arc<dyn Entity>>;
}

/// A converted, batch-ready event (spec §3 `ConvertedEvent`).
pub struct ConvertedEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub message: String,
    /// `len(message) + PER_EVENT_HEADER_BYTES`, cached at conversion time.
    pub event_bytes: usize,
    pub done_callback: Option<Box<dyn FnOnce() + Send>>,
    pub range_state: Option<ConvertedRangeState>,
}

/// The progress-tracking half of a converted event, carried separately from
/// `done_callback` because only one of the two fires per event (spec §4.2
/// step 3).
pub struct ConvertedRangeState {
    pub range: Range<u64>,
    pub range_queue: std::sync::Arc<dyn RangeQueueId>,
}

impl std::fmt::Debug for ConvertedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvertedEvent")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("message_len", &self.message.len())
            .field("event_bytes", &self.event_bytes)
            .field("has_range_state", &self.range_state.is_some())
            .finish()
    }
}
