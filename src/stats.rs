// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The stats collaborator (spec §9 "Global state"). This crate's Non-goals
//! exclude *collecting* metrics, so only the bounded call boundary lives
//! here: a trait the core calls into at well-defined points (`"rawSize"`,
//! `"emfMetricDrop"`), a no-op default, and a test double that records
//! counts for assertions.

use std::collections::HashMap;
use std::sync::Mutex;

/// A process-wide counters sink. Implementations decide how (or whether) to
/// aggregate and export; this crate only calls `add_stats` at the points
/// spec §9 names.
pub trait Stats: Send + Sync {
    fn add_stats(&self, name: &'static str, value: i64);
}

/// Default implementation: discards everything. Used when the embedding
/// process has no stats collaborator wired up.
#[derive(Debug, Default)]
pub struct NullStats;

impl Stats for NullStats {
    fn add_stats(&self, _name: &'static str, _value: i64) {}
}

/// Test double that records every call, keyed by counter name, so
/// integration tests can assert e.g. `"emfMetricDrop"` incremented after an
/// overflow.
#[derive(Debug, Default)]
pub struct CountingStats {
    counts: Mutex<HashMap<&'static str, i64>>,
}

impl CountingStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> i64 {
        self.counts.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl Stats for CountingStats {
    fn add_stats(&self, name: &'static str, value: i64) {
        *self.counts.lock().unwrap().entry(name).or_insert(0) += value;
    }
}
