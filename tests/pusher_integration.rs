// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end scenarios wiring `Pusher`, `Destination`, and `TargetManager`
//! against a scripted `UpstreamClient`.

mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log_pusher_core::client::UpstreamError;
use log_pusher_core::config::{PusherConfig, TargetManagerConfig, WireLimits};
use log_pusher_core::destination::{Destination, OnStop};
use log_pusher_core::event::LogEvent;
use log_pusher_core::pusher::Pusher;
use log_pusher_core::stats::{CountingStats, NullStats};
use log_pusher_core::target::Target;
use log_pusher_core::target_manager::TargetManager;

use support::mock_client::{MockClient, Script};

struct TestEvent {
    message: String,
    time: Option<SystemTime>,
    done: Arc<AtomicBool>,
}

impl LogEvent for TestEvent {
    fn message(&self) -> &str {
        &self.message
    }
    fn time(&self) -> Option<SystemTime> {
        self.time
    }
    fn done(self: Box<Self>) {
        self.done.store(true, Ordering::SeqCst);
    }
}

fn event(msg: &str, t: SystemTime) -> (Box<dyn LogEvent>, Arc<AtomicBool>) {
    let done = Arc::new(AtomicBool::new(false));
    let ev = Box::new(TestEvent {
        message: msg.to_owned(),
        time: Some(t),
        done: done.clone(),
    });
    (ev, done)
}

struct NoopOnStop;
impl OnStop for NoopOnStop {
    fn on_stop(&self) {}
}

/// Flush timing: a single event is sent once `flush_timeout` elapses with no
/// further activity, and not before.
#[tokio::test(start_paused = true)]
async fn flush_timeout_sends_lone_event() {
    let client = Arc::new(MockClient::new());
    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_millis(50),
        ..PusherConfig::default()
    });
    let target = Target::new("group-a", "stream-a");
    let pusher = Pusher::new(target.clone(), config.clone(), client.clone(), tm, Arc::new(NullStats)).await;

    let (ev, done) = event("hello", SystemTime::now());
    pusher.queue().add_event(ev, &config.wire_limits).await;

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    pusher.stop().await;
    assert_eq!(client.put_log_events_call_count(), 1);
    assert!(done.load(Ordering::SeqCst));
}

/// Out-of-order arrival: events appended out of timestamp order are sorted
/// before the request is built.
#[tokio::test(start_paused = true)]
async fn out_of_order_events_are_sorted_before_send() {
    let client = Arc::new(MockClient::new());
    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_millis(20),
        ..PusherConfig::default()
    });
    let target = Target::new("group-b", "stream-b");
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;

    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    for (i, offset) in [30i64, 10, 20].into_iter().enumerate() {
        let (ev, _) = event(&format!("m{i}"), base + Duration::from_secs(offset.unsigned_abs()));
        pusher.queue().add_event(ev, &config.wire_limits).await;
    }

    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    pusher.stop().await;

    let calls = client.put_log_events_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let timestamps: Vec<i64> = calls[0].events.iter().map(|e| e.timestamp_ms).collect();
    let mut sorted = timestamps.clone();
    sorted.sort_unstable();
    assert_eq!(timestamps, sorted);
}

/// Retry-then-success: the first `PutLogEvents` call fails with a
/// long-retry-family error, the sender retries, and the second call
/// succeeds, firing the event's `done` callback exactly once.
#[tokio::test(start_paused = true)]
async fn retry_then_success_fires_done_once() {
    let client = Arc::new(MockClient::new());
    let target = Target::new("group-c", "stream-c");
    client.script_put_log_events(
        &target,
        vec![Script::Fail(|| UpstreamError::ServiceUnavailable("overloaded".into()))],
    );

    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_millis(10),
        ..PusherConfig::default()
    });
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;

    let (ev, done) = event("retry-me", SystemTime::now());
    pusher.queue().add_event(ev, &config.wire_limits).await;

    // Let the flush fire, the failed attempt happen, and the inline backoff
    // sleep (short-family: base 200ms) elapse before the retry succeeds.
    for _ in 0..20 {
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        if done.load(Ordering::SeqCst) {
            break;
        }
    }

    pusher.stop().await;
    assert!(client.put_log_events_call_count() >= 2);
    assert!(done.load(Ordering::SeqCst));
}

/// Byte/count cap: appending enough events to exceed `max_events_per_request`
/// forces the queue to flush the first batch once it is full, producing two
/// requests rather than one oversized one.
#[tokio::test(start_paused = true)]
async fn batch_splits_once_event_count_cap_is_reached() {
    let client = Arc::new(MockClient::new());
    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_secs(3600),
        wire_limits: WireLimits {
            max_events_per_request: 3,
            ..WireLimits::default()
        },
        ..PusherConfig::default()
    });
    let target = Target::new("group-d", "stream-d");
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;

    let now = SystemTime::now();
    for i in 0..5 {
        let (ev, _) = event(&format!("m{i}"), now);
        pusher.queue().add_event(ev, &config.wire_limits).await;
    }

    tokio::time::advance(Duration::from_millis(1)).await;
    pusher.stop().await;

    let calls = client.put_log_events_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].events.len(), 3);
    assert_eq!(calls[1].events.len(), 2);
}

/// EMF-mode switch: once a published message carries the EMF marker, the
/// destination latches into the non-blocking path and an overflow beyond
/// the non-blocking channel's capacity is counted as a drop rather than
/// backpressuring the caller.
#[tokio::test(start_paused = true)]
async fn emf_marker_switches_to_non_blocking_path_and_counts_overflow() {
    let client = Arc::new(MockClient::new());
    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    // A tiny event cap keeps the (derived) non-blocking channel capacity
    // small enough to overflow without sending an unreasonable event count.
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_secs(3600),
        wire_limits: WireLimits {
            max_events_per_request: 2,
            ..WireLimits::default()
        },
        non_blocking_queue_multiplier: 1,
        ..PusherConfig::default()
    });
    let target = Target::new("group-e", "stream-e");
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;
    let dest = Destination::new(pusher, &config, Arc::new(NoopOnStop));
    let stats = Arc::new(CountingStats::new());

    assert!(!dest.is_emf());
    let (emf_ev, _) = event(r#"{"_aws":{"CloudWatchMetrics":[]}}"#, SystemTime::now());
    dest.publish(vec![emf_ev], stats.as_ref()).await.unwrap();
    assert!(dest.is_emf());

    // Flood past the non-blocking channel's tiny capacity so at least one
    // event is dropped and counted.
    let mut events: Vec<Box<dyn LogEvent>> = Vec::new();
    for i in 0..10 {
        let (ev, _) = event(&format!("overflow-{i}"), SystemTime::now());
        events.push(ev);
    }
    dest.publish(events, stats.as_ref()).await.unwrap();

    assert!(stats.get("emfMetricDrop") >= 1);
    dest.notify_source_stopped().await;
}

/// Refcount sharing: two sources publishing through the same `Destination`
/// keep it alive until both call `notify_source_stopped`.
#[tokio::test(start_paused = true)]
async fn refcount_sharing_keeps_destination_alive_until_last_source_stops() {
    let client = Arc::new(MockClient::new());
    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig::default());
    let target = Target::new("group-f", "stream-f");
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;
    let stopped = Arc::new(Mutex::new(false));

    struct RecordingOnStop(Arc<Mutex<bool>>);
    impl OnStop for RecordingOnStop {
        fn on_stop(&self) {
            *self.0.lock().unwrap() = true;
        }
    }

    let dest = Destination::new(pusher, &config, Arc::new(RecordingOnStop(stopped.clone())));
    dest.add_ref();
    assert_eq!(dest.ref_count(), 2);

    dest.notify_source_stopped().await;
    assert!(!*stopped.lock().unwrap());
    assert_eq!(dest.ref_count(), 1);

    dest.notify_source_stopped().await;
    assert!(*stopped.lock().unwrap());
    assert_eq!(dest.ref_count(), 0);
}

/// Target recovery: a `ResourceNotFound` response on the first send triggers
/// `TargetManager::init_target` (which creates the stream via the mocked
/// client), after which the retried send succeeds.
#[tokio::test(start_paused = true)]
async fn resource_not_found_recovers_via_target_manager_then_retries() {
    let client = Arc::new(MockClient::new());
    let target = Target::new("group-g", "stream-g");
    client.mark_stream_missing(&target);
    client.script_put_log_events(
        &target,
        vec![Script::Fail(|| UpstreamError::ResourceNotFound("stream missing".into()))],
    );

    let tm = TargetManager::start(client.clone(), TargetManagerConfig::default());
    let config = Arc::new(PusherConfig {
        flush_timeout: Duration::from_millis(10),
        ..PusherConfig::default()
    });
    let pusher = Pusher::new(target, config.clone(), client.clone(), tm, Arc::new(NullStats)).await;

    let (ev, done) = event("recover-me", SystemTime::now());
    pusher.queue().add_event(ev, &config.wire_limits).await;

    for _ in 0..20 {
        tokio::time::advance(Duration::from_millis(300)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        if done.load(Ordering::SeqCst) {
            break;
        }
    }

    pusher.stop().await;
    assert!(done.load(Ordering::SeqCst));
    assert!(!client.create_stream_calls.lock().unwrap().is_empty());
}
