//! Search load tracking
//!
//! Rolling window of store-call latencies plus per-strategy counters. The
//! window is bounded by sample count on write and filtered by sample age on
//! read; the overload flag is recomputed on every read from the live active
//! count and the current p95, never cached.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::classifier::QueryStrategy;

/// One observed store-call latency.
#[derive(Debug, Clone, Copy)]
struct LoadSample {
    latency_ms: u64,
    observed_at: Instant,
}

/// Point-in-time load snapshot, derived on demand.
#[derive(Debug, Clone, Serialize)]
pub struct LoadStatus {
    /// Searches currently holding a slot.
    pub active_count: usize,
    /// Requests inside the engine that have not yet acquired a slot.
    pub queued_count: usize,
    /// Free slots in the pool.
    pub available_slots: usize,
    /// 95th-percentile latency over the recent window, 0 with no samples.
    pub p95_latency_ms: u64,
    /// True when the active count or the p95 crosses its threshold.
    pub overloaded: bool,
}

/// Overload thresholds, fixed at construction from configuration.
#[derive(Debug, Clone, Copy)]
pub struct OverloadThresholds {
    pub active_searches: usize,
    pub p95_latency_ms: u64,
}

/// Rolling latency window with overload detection and per-strategy
/// analytics counters.
#[derive(Debug)]
pub struct LoadTracker {
    samples: RwLock<VecDeque<LoadSample>>,
    strategy_counts: RwLock<HashMap<&'static str, u64>>,
    window_size: usize,
    window_span: Duration,
    thresholds: OverloadThresholds,
}

impl LoadTracker {
    pub fn new(window_size: usize, window_span: Duration, thresholds: OverloadThresholds) -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(window_size)),
            strategy_counts: RwLock::new(HashMap::new()),
            window_size,
            window_span,
            thresholds,
        }
    }

    /// Append a latency sample, evicting the oldest past the window size.
    pub fn record(&self, latency: Duration) {
        self.record_at(latency, Instant::now());
    }

    fn record_at(&self, latency: Duration, observed_at: Instant) {
        let mut samples = self.samples.write();
        if samples.len() >= self.window_size {
            samples.pop_front();
        }
        samples.push_back(LoadSample {
            latency_ms: latency.as_millis() as u64,
            observed_at,
        });
    }

    /// Count a classification outcome for the analytics breakdown.
    pub fn record_strategy(&self, strategy: QueryStrategy) {
        *self.strategy_counts.write().entry(strategy.as_str()).or_insert(0) += 1;
    }

    /// Per-strategy search counts since process start.
    pub fn strategy_counts(&self) -> HashMap<&'static str, u64> {
        self.strategy_counts.read().clone()
    }

    /// Compute the current status from the live gate gauges and the sample
    /// window. Samples older than the window span are ignored.
    pub fn status(&self, active_count: usize, queued_count: usize, available_slots: usize) -> LoadStatus {
        let p95_latency_ms = self.p95_ms();
        let overloaded = active_count > self.thresholds.active_searches
            || p95_latency_ms > self.thresholds.p95_latency_ms;
        LoadStatus {
            active_count,
            queued_count,
            available_slots,
            p95_latency_ms,
            overloaded,
        }
    }

    fn p95_ms(&self) -> u64 {
        let samples = self.samples.read();
        let mut recent: Vec<u64> = samples
            .iter()
            .filter(|s| s.observed_at.elapsed() <= self.window_span)
            .map(|s| s.latency_ms)
            .collect();
        if recent.is_empty() {
            return 0;
        }
        recent.sort_unstable();
        let idx = (recent.len() as f64 * 0.95) as usize;
        recent[idx.min(recent.len() - 1)]
    }

    /// Samples currently held (recent or not).
    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }
}
