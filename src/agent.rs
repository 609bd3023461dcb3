// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `LogAgent` (spec §4.9): the supervisor that wires discovered sources to
//! backend destinations. The concrete file-tailing/collection machinery is
//! out of scope (spec §1 Non-goals); `LogCollection`/`Source`/`Backend` are
//! the seams it attaches to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::config::LogAgentConfig;
use crate::destination::Destination;
use crate::event::LogEvent;
use crate::stats::Stats;
use crate::target::{StorageClass, Target};

/// One discovered forwarding pipeline: a source's identity plus its event
/// stream (spec §4.9: "obtains its destinationName, group, stream,
/// description, retention, class").
#[async_trait]
pub trait Source: Send + Sync {
    fn destination_name(&self) -> &str;
    fn group(&self) -> &str;
    fn stream(&self) -> &str;
    fn description(&self) -> &str;
    fn retention_days(&self) -> i32;
    fn class(&self) -> StorageClass;

    /// Pull the next event. `None` is the source's close sentinel (spec
    /// §4.9: "on nil sentinel from the source it closes the channel and
    /// exits").
    async fn next_event(&mut self) -> Option<Box<dyn LogEvent>>;
}

/// One log-collection mechanism (e.g. a file-tailer); owns zero or more
/// `Source`s discovered over time.
#[async_trait]
pub trait LogCollection: Send + Sync {
    fn start(&self);
    fn restart(&self);

    /// Sources discovered since the last call (spec §4.9: "every second,
    /// polls collections for new sources").
    async fn poll_new_sources(&self) -> Vec<Box<dyn Source>>;

    /// Collector-wide "open file count" liveness signal (spec §4.9).
    fn open_file_count(&self) -> u64;
}

/// A named output backend that can create (or return an existing,
/// refcounted) `Destination` for a target (spec §4.9 `CreateDest`).
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn create_dest(&self, target: Target) -> Arc<Destination>;
}

/// Supervises source discovery and liveness for a static set of backends
/// and collections (spec §4.9).
pub struct LogAgent {
    backends: HashMap<String, Arc<dyn Backend>>,
    collections: Vec<Arc<dyn LogCollection>>,
    config: LogAgentConfig,
    stats: Arc<dyn Stats>,
    retention_attempted: Mutex<HashSet<String>>,
    stop: tokio::sync::watch::Sender<bool>,
}

impl LogAgent {
    #[must_use]
    pub fn new(
        backends: Vec<Arc<dyn Backend>>,
        collections: Vec<Arc<dyn LogCollection>>,
        config: LogAgentConfig,
        stats: Arc<dyn Stats>,
    ) -> Arc<Self> {
        let backends = backends.into_iter().map(|b| (b.name().to_owned(), b)).collect();
        let (stop, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            backends,
            collections,
            config,
            stats,
            retention_attempted: Mutex::new(HashSet::new()),
            stop,
        })
    }

    /// Start all collections and the polling/liveness loops. Returns once
    /// the agent is stopped (spec §4.9: "on cancellation of the outer
    /// context, returns").
    pub async fn run(self: &Arc<Self>) {
        for c in &self.collections {
            c.start();
        }

        let mut stop_rx_poll = self.stop.subscribe();
        let mut stop_rx_live = self.stop.subscribe();
        let agent_poll = self.clone();
        let agent_live = self.clone();

        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(agent_poll.config.source_poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => agent_poll.poll_once().await,
                    _ = stop_rx_poll.changed() => break,
                }
            }
        });

        let live_task = tokio::spawn(async move {
            agent_live.liveness_loop(&mut stop_rx_live).await;
        });

        let _ = tokio::join!(poll_task, live_task);
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    async fn poll_once(&self) {
        for collection in &self.collections {
            for mut source in collection.poll_new_sources().await {
                let Some(backend) = self.backends.get(source.destination_name()).cloned() else {
                    error!(
                        "no backend registered for destination {}, dropping source",
                        source.destination_name()
                    );
                    continue;
                };

                let effective_retention = self.check_retention_already_attempted(source.group(), source.retention_days()).await;
                let target = Target::new(source.group(), source.stream())
                    .with_class(source.class())
                    .with_retention_days(effective_retention);
                let dest = backend.create_dest(target);
                let stats = self.stats.clone();

                tokio::spawn(async move {
                    loop {
                        match source.next_event().await {
                            Some(event) => match dest.publish(vec![event], stats.as_ref()).await {
                                Ok(()) => {}
                                Err(crate::error::PusherError::ErrOutputStopped) => {
                                    info!("destination stopped, forwarder exiting");
                                    break;
                                }
                                Err(e) => {
                                    warn!("publish failed, forwarder exiting: {e}");
                                    break;
                                }
                            },
                            None => break,
                        }
                    }
                    dest.notify_source_stopped().await;
                });
            }
        }
    }

    /// First positive retention seen for a log group wins; subsequent
    /// requests for the same group pass `-1` ("do not override") (spec
    /// §4.9, §11).
    async fn check_retention_already_attempted(&self, group: &str, retention_days: i32) -> i32 {
        if retention_days <= 0 {
            return retention_days;
        }
        let mut attempted = self.retention_attempted.lock().await;
        if attempted.contains(group) {
            -1
        } else {
            attempted.insert(group.to_owned());
            retention_days
        }
    }

    async fn liveness_loop(&self, stop_rx: &mut tokio::sync::watch::Receiver<bool>) {
        if !self.config.liveness_restart_enabled {
            let _ = stop_rx.changed().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.config.liveness_poll_interval);
        let mut zero_since: Option<Instant> = None;
        let mut was_positive = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let total: u64 = self.collections.iter().map(|c| c.open_file_count()).sum();
                    if total == 0 {
                        let now = Instant::now();
                        let first_zero = zero_since.get_or_insert(now);
                        let dropped_from_positive = was_positive;
                        was_positive = false;
                        if dropped_from_positive || now.duration_since(*first_zero) >= self.config.liveness_zero_threshold {
                            warn!("open file count has been zero, restarting all collections");
                            for c in &self.collections {
                                c.restart();
                            }
                            zero_since = None;
                        }
                    } else {
                        was_positive = true;
                        zero_since = None;
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    }
}
