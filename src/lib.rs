// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]

//! Reliable, batched log-shipping pusher core: converter, batcher, queue,
//! sender, worker pool, retry heap, and target manager for one CloudWatch
//! Logs-style target, plus the `LogAgent` supervisor that wires discovered
//! sources to backend destinations. The concrete upstream transport, file
//! tailing, and credential acquisition are external collaborators reached
//! only through the `UpstreamClient` and `LogAgent`-seam traits (spec §1).

use std::sync::Arc;

pub mod agent;
pub mod batch;
pub mod client;
pub mod config;
pub mod converter;
pub mod destination;
pub mod error;
pub mod event;
pub mod logging;
pub mod pusher;
pub mod queue;
pub mod retry_heap;
pub mod retry_policy;
pub mod sender;
pub mod stats;
pub mod syslog_writer;
pub mod target;
pub mod target_manager;
pub mod worker_pool;

use client::UpstreamClient;
use config::PusherConfig;
use event::EntityProvider;
use pusher::Pusher;
use stats::Stats;
use target::Target;
use target_manager::{TargetManager, TargetManagerConfig};

/// Top-level handle for one backend: owns the shared `TargetManager` and
/// hands out `Pusher`s for individual targets. Mirrors the teacher's
/// `Otel` struct as the single facade wiring the crate's pieces together
/// (spec §9 "Process-wide TargetManager").
pub struct LogPusherCore {
    client: Arc<dyn UpstreamClient>,
    target_manager: Arc<TargetManager>,
    stats: Arc<dyn Stats>,
}

impl LogPusherCore {
    #[must_use]
    pub fn new(client: Arc<dyn UpstreamClient>, target_manager_config: TargetManagerConfig, stats: Arc<dyn Stats>) -> Self {
        let target_manager = TargetManager::start(client.clone(), target_manager_config);
        Self {
            client,
            target_manager,
            stats,
        }
    }

    /// Build a `Pusher` for one target, wired with this core's shared
    /// `TargetManager` and `UpstreamClient` (spec §4.8).
    pub async fn new_pusher(&self, target: Target, config: Arc<PusherConfig>) -> Arc<Pusher> {
        Pusher::new(target, config, self.client.clone(), self.target_manager.clone(), self.stats.clone()).await
    }

    /// Same as `new_pusher`, attaching `entity_provider`'s `Entity` to
    /// every request this target's batches build (spec §9).
    pub async fn new_pusher_with_entity_provider(
        &self,
        target: Target,
        config: Arc<PusherConfig>,
        entity_provider: Arc<dyn EntityProvider>,
    ) -> Arc<Pusher> {
        Pusher::new_with_entity_provider(
            target,
            config,
            self.client.clone(),
            self.target_manager.clone(),
            self.stats.clone(),
            Some(entity_provider),
        )
        .await
    }

    #[must_use]
    pub fn target_manager(&self) -> &Arc<TargetManager> {
        &self.target_manager
    }

    /// Graceful shutdown: stops the `TargetManager`'s background workers.
    /// Individual `Pusher`s are the caller's responsibility to stop, since
    /// their lifetime is typically tied to a `Destination`'s refcount
    /// (spec §4.8), not to this facade.
    pub async fn shutdown(&self) {
        self.target_manager.stop().await;
    }
}

/// Entity provider that resolves to no entity: the default when a backend
/// does not attach AWS entity metadata (spec §9).
pub struct NoEntityProvider;

impl EntityProvider for NoEntityProvider {
    fn entity(&self) -> Option<Arc<dyn event::Entity>> {
        None
    }
}
