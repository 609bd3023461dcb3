// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::Deserialize;

use crate::target::{StorageClass, Target};

/// Wire-format limits the CloudWatch Logs `PutLogEvents` API enforces on
/// every batch (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireLimits {
    /// Documented per-event overhead added to `len(message)` when
    /// accounting against the request byte budget. Spec §9's open question
    /// names three inconsistent values seen across the source repository
    /// (26 / 52 / 200); this crate fixes it at 26, the current API's
    /// documented overhead. See DESIGN.md.
    pub per_event_header_bytes: usize,
    /// Max total request bytes: `Σ(len(message) + per_event_header_bytes)`.
    pub max_request_bytes: usize,
    /// Max events in a single request.
    pub max_events_per_request: usize,
    /// Max span between the oldest and newest timestamp in one request.
    pub max_request_time_span: Duration,
    /// How far into the future an event's timestamp may be and still be
    /// accepted.
    pub max_future_offset: Duration,
    /// How far into the past an event's timestamp may be and still be
    /// accepted.
    pub max_past_offset: Duration,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            per_event_header_bytes: 26,
            max_request_bytes: 1_048_576,
            max_events_per_request: 10_000,
            max_request_time_span: Duration::from_secs(24 * 3600),
            max_future_offset: Duration::from_secs(2 * 3600),
            max_past_offset: Duration::from_secs(14 * 24 * 3600),
        }
    }
}

/// Tunables for one `Pusher` (spec §6 "Configuration (enumerated)").
#[derive(Clone, Debug)]
pub struct PusherConfig {
    /// Time-since-last-successful-send after which a non-empty batch is
    /// forced out.
    pub flush_timeout: Duration,
    /// Hard wall-clock limit for a single batch's total retry time.
    pub max_retry_duration: Duration,
    /// When > 1, `WorkerPool` + `RetryHeap` are used instead of inline
    /// sleep-and-retry.
    pub concurrency: usize,
    /// Capacity of the `RetryHeap`; defaults to `concurrency` when unset.
    pub retry_heap_capacity: usize,
    pub wire_limits: WireLimits,
    /// Capacity of the reliable (blocking) ingestion channel.
    pub reliable_queue_capacity: usize,
    /// Multiplier applied to `wire_limits.max_events_per_request` to size
    /// the lazily-created drop-on-overflow channel.
    pub non_blocking_queue_multiplier: usize,
    /// Timestamps older than this trigger at most one warning every
    /// `warn_old_timestamp_interval` (spec §4.1).
    pub warn_old_timestamp: Duration,
    pub warn_old_timestamp_interval: Duration,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            flush_timeout: Duration::from_secs(5),
            max_retry_duration: Duration::from_secs(14 * 24 * 3600 + 10 * 60),
            concurrency: 1,
            retry_heap_capacity: 1,
            wire_limits: WireLimits::default(),
            reliable_queue_capacity: 100,
            non_blocking_queue_multiplier: 2,
            warn_old_timestamp: Duration::from_secs(24 * 3600),
            warn_old_timestamp_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl PusherConfig {
    /// Resolve `retry_heap_capacity`, defaulting to `concurrency` the way
    /// spec §6 describes ("retryHeapCapacity (≈ concurrency)").
    #[must_use]
    pub fn effective_retry_heap_capacity(&self) -> usize {
        if self.retry_heap_capacity == 0 {
            self.concurrency.max(1)
        } else {
            self.retry_heap_capacity
        }
    }

    #[must_use]
    pub fn non_blocking_queue_capacity(&self) -> usize {
        self.wire_limits.max_events_per_request * self.non_blocking_queue_multiplier
    }
}

/// Tunables for the process-wide `TargetManager` (spec §4.7).
#[derive(Clone, Debug)]
pub struct TargetManagerConfig {
    /// How long a successful `init_target` result is trusted before a
    /// repeat call is allowed to hit the upstream service again.
    pub target_cache_ttl: Duration,
    pub describe_batch_flush_interval: Duration,
    pub describe_batch_size: usize,
    /// Base delay for the describe/put-retention background workers'
    /// backoff (§4.7: "base 1s, doubling, capped at 10s, with 50% jitter").
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_max_attempts: u32,
}

impl Default for TargetManagerConfig {
    fn default() -> Self {
        Self {
            target_cache_ttl: Duration::from_secs(5),
            describe_batch_flush_interval: Duration::from_secs(5),
            describe_batch_size: 50,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
            backoff_max_attempts: 5,
        }
    }
}

/// Static per-source configuration consumed by `LogAgent` (spec §4.9,
/// §6 "Source contract").
#[derive(Clone, Debug, Deserialize)]
pub struct SourceTargetConfig {
    pub destination_name: String,
    pub group: String,
    pub stream: String,
    pub description: String,
    pub retention_days: i32,
    pub class: StorageClass,
}

impl SourceTargetConfig {
    #[must_use]
    pub fn target(&self) -> Target {
        Target {
            group: self.group.clone(),
            stream: self.stream.clone(),
            class: self.class,
            retention_days: self.retention_days,
        }
    }
}

/// Tunables for `LogAgent` (spec §4.9).
#[derive(Clone, Debug)]
pub struct LogAgentConfig {
    pub source_poll_interval: Duration,
    pub liveness_poll_interval: Duration,
    /// If the open-file-count liveness signal stays at zero for at least
    /// this long, all collections are restarted (spec §4.9, §9 open
    /// question: this heuristic can misfire for agents with no tailed
    /// files, so it is gated by `liveness_restart_enabled`).
    pub liveness_zero_threshold: Duration,
    pub liveness_restart_enabled: bool,
}

impl Default for LogAgentConfig {
    fn default() -> Self {
        Self {
            source_poll_interval: Duration::from_secs(1),
            liveness_poll_interval: Duration::from_secs(1),
            liveness_zero_threshold: Duration::from_secs(5),
            liveness_restart_enabled: true,
        }
    }
}

/// Top-level logging configuration, mirroring the teacher's `Config`
/// surface for the parts it owns (service name, stderr mirroring, level
/// directives) while dropping everything the teacher's OTEL-SDK wiring
/// owned that has no counterpart here (Prometheus registry, metrics export
/// targets).
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub service_name: String,
    pub emit_logs_to_stderr: bool,
    /// `env_filter`-style directive string, e.g. `"info"` or
    /// `"warn,log_pusher_core::sender=debug"`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "log-pusher".to_owned(),
            emit_logs_to_stderr: true,
            level: "info".to_owned(),
        }
    }
}
