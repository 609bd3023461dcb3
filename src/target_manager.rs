// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `TargetManager` (spec §4.7): process-wide registry that creates log
//! groups/streams on demand, reconciles retention policies, and caches
//! initialized targets with a TTL. One instance is shared by every
//! `Destination` for a backend (spec §9 "Process-wide TargetManager").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, warn};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};

use crate::client::{LogGroupRetention, UpstreamClient, UpstreamError};
use crate::config::TargetManagerConfig;
use crate::target::Target;

fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.min(32));
    let nominal_ms = (base.as_millis() as u64).saturating_mul(exp).min(cap.as_millis() as u64);
    let half = nominal_ms / 2;
    let jittered = if half == 0 {
        nominal_ms
    } else {
        half + rand::thread_rng().gen_range(0..=nominal_ms)
    };
    Duration::from_millis(jittered.min(cap.as_millis() as u64))
}

/// Process-wide target registry (spec §4.7).
pub struct TargetManager {
    client: Arc<dyn UpstreamClient>,
    config: TargetManagerConfig,
    cache: Mutex<HashMap<Target, Instant>>,
    init_lock: Mutex<()>,
    describe_tx: mpsc::UnboundedSender<Target>,
    retention_tx: mpsc::UnboundedSender<Target>,
    describe_join: Mutex<Option<tokio::task::JoinHandle<()>>>,
    retention_join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TargetManager {
    #[must_use]
    pub fn start(client: Arc<dyn UpstreamClient>, config: TargetManagerConfig) -> Arc<Self> {
        let (describe_tx, describe_rx) = mpsc::unbounded_channel::<Target>();
        let (retention_tx, retention_rx) = mpsc::unbounded_channel::<Target>();

        let describe_join = tokio::spawn(Self::describe_worker(
            client.clone(),
            config.clone(),
            describe_rx,
            retention_tx.clone(),
        ));
        let retention_join = tokio::spawn(Self::retention_worker(client.clone(), config.clone(), retention_rx));

        Arc::new(Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
            init_lock: Mutex::new(()),
            describe_tx,
            retention_tx,
            describe_join: Mutex::new(Some(describe_join)),
            retention_join: Mutex::new(Some(retention_join)),
        })
    }

    /// Ensure the log group/stream for `target` exists upstream, creating
    /// them as needed and reconciling retention (spec §4.7 `InitTarget`).
    pub async fn init_target(&self, target: &Target) -> Result<(), crate::error::PusherError> {
        {
            let cache = self.cache.lock().await;
            if let Some(last_hit) = cache.get(target) {
                if last_hit.elapsed() <= self.config.target_cache_ttl {
                    return Ok(());
                }
            }
        }

        let _guard = self.init_lock.lock().await;
        // Re-check under the lock: another caller may have just refreshed
        // the cache entry while we waited for it.
        {
            let cache = self.cache.lock().await;
            if let Some(last_hit) = cache.get(target) {
                if last_hit.elapsed() <= self.config.target_cache_ttl {
                    return Ok(());
                }
            }
        }

        let result = match self.client.create_log_stream(target).await {
            Ok(()) => self.on_stream_present(target).await,
            Err(e) if e.is_already_exists() => self.on_stream_present(target).await,
            Err(UpstreamError::ResourceNotFound(_)) => self.create_group_then_stream(target).await,
            Err(e) => Err(e),
        };
        result.map_err(|source| crate::error::PusherError::TargetInit {
            target: target.clone(),
            source,
        })
    }

    async fn create_group_then_stream(&self, target: &Target) -> Result<(), UpstreamError> {
        match self.client.create_log_group(&target.group, target.class).await {
            Ok(()) => {
                // Newly created group: it has no retention policy yet, so
                // we know we need to set one directly rather than describe
                // first.
                if target.wants_retention() {
                    let _ = self.retention_tx.send(target.clone());
                }
                self.retry_stream_creation_once(target).await
            }
            Err(e) if e.is_already_exists() => {
                // Group already existed with unknown retention: go through
                // the describe path to find out if it needs reconciling.
                if target.wants_retention() {
                    let _ = self.describe_tx.send(target.clone());
                }
                self.retry_stream_creation_once(target).await
            }
            Err(e) => Err(e),
        }
    }

    async fn retry_stream_creation_once(&self, target: &Target) -> Result<(), UpstreamError> {
        match self.client.create_log_stream(target).await {
            Ok(()) => {
                self.cache_success(target).await;
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                self.cache_success(target).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The stream is confirmed present (either freshly created or already
    /// existed). Enqueue a retention check if wanted, then cache success.
    async fn on_stream_present(&self, target: &Target) -> Result<(), UpstreamError> {
        if target.wants_retention() {
            let _ = self.describe_tx.send(target.clone());
        }
        self.cache_success(target).await;
        Ok(())
    }

    async fn cache_success(&self, target: &Target) {
        self.cache.lock().await.insert(target.clone(), Instant::now());
    }

    /// `PutRetentionPolicy`, called publicly from `Pusher` construction:
    /// enqueues onto the describe-channel, assuming the group already
    /// exists (spec §4.7).
    pub fn put_retention_policy(&self, target: &Target) {
        if target.wants_retention() {
            let _ = self.describe_tx.send(target.clone());
        }
    }

    async fn describe_worker(
        client: Arc<dyn UpstreamClient>,
        config: TargetManagerConfig,
        mut rx: mpsc::UnboundedReceiver<Target>,
        retention_tx: mpsc::UnboundedSender<Target>,
    ) {
        let mut buffer: Vec<Target> = Vec::new();
        let mut ticker = tokio::time::interval(config.describe_batch_flush_interval);
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(t) => {
                            buffer.push(t);
                            if buffer.len() >= config.describe_batch_size {
                                Self::flush_describe(&client, &config, &mut buffer, &retention_tx).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        Self::flush_describe(&client, &config, &mut buffer, &retention_tx).await;
                    }
                }
            }
        }
    }

    async fn flush_describe(
        client: &Arc<dyn UpstreamClient>,
        config: &TargetManagerConfig,
        buffer: &mut Vec<Target>,
        retention_tx: &mpsc::UnboundedSender<Target>,
    ) {
        let batch: Vec<Target> = buffer.drain(..buffer.len().min(config.describe_batch_size)).collect();
        let mut groups: Vec<String> = batch.iter().map(|t| t.group.clone()).collect();
        groups.sort();
        groups.dedup();

        let mut result: Option<Vec<LogGroupRetention>> = None;
        for attempt in 0..config.backoff_max_attempts {
            match client.describe_log_groups(&groups).await {
                Ok(r) => {
                    result = Some(r);
                    break;
                }
                Err(e) => {
                    warn!("describe_log_groups attempt {attempt} failed: {e}");
                    tokio::time::sleep(backoff_delay(config.backoff_base, config.backoff_cap, attempt)).await;
                }
            }
        }
        let Some(current) = result else {
            error!("describe_log_groups exhausted retries for {} groups", groups.len());
            return;
        };
        let by_group: HashMap<&str, Option<i32>> =
            current.iter().map(|r| (r.group.as_str(), r.retention_days)).collect();

        for target in batch {
            let current_retention = by_group.get(target.group.as_str()).copied().flatten();
            if current_retention != Some(target.retention_days) && target.wants_retention() {
                let _ = retention_tx.send(target);
            }
        }
    }

    async fn retention_worker(
        client: Arc<dyn UpstreamClient>,
        config: TargetManagerConfig,
        mut rx: mpsc::UnboundedReceiver<Target>,
    ) {
        while let Some(target) = rx.recv().await {
            let mut ok = false;
            for attempt in 0..config.backoff_max_attempts {
                match client.put_retention_policy(&target.group, target.retention_days).await {
                    Ok(()) => {
                        ok = true;
                        break;
                    }
                    Err(e) => {
                        warn!("put_retention_policy({}) attempt {attempt} failed: {e}", target.group);
                        tokio::time::sleep(backoff_delay(config.backoff_base, config.backoff_cap, attempt)).await;
                    }
                }
            }
            if !ok {
                error!("put_retention_policy({}) failed after {} attempts", target.group, config.backoff_max_attempts);
            }
        }
    }

    pub async fn stop(&self) {
        if let Some(h) = self.describe_join.lock().await.take() {
            h.abort();
        }
        if let Some(h) = self.retention_join.lock().await.take() {
            h.abort();
        }
    }
}
