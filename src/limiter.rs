//! Failed-query limiter
//!
//! A per-query-string circuit breaker against repeatedly expensive
//! searches. Keyed by the exact raw query as received, independent of who
//! sent it. Only store timeouts count as failures; entries go stale after
//! the reset window and are swept opportunistically on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Failure history for one exact query string.
#[derive(Debug, Clone, Copy)]
struct FailedQueryRecord {
    failure_count: u32,
    last_failure_at: Instant,
}

/// Blocks query strings that keep timing out.
#[derive(Debug)]
pub struct FailedQueryLimiter {
    entries: Mutex<HashMap<String, FailedQueryRecord>>,
    max_failed_attempts: u32,
    reset_window: Duration,
}

/// Sweep the whole map once it grows past this many entries; keeps memory
/// bounded without a background task.
const SWEEP_THRESHOLD: usize = 1024;

impl FailedQueryLimiter {
    pub fn new(max_failed_attempts: u32, reset_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_failed_attempts,
            reset_window,
        }
    }

    /// Whether this query string is currently blocked. Returns the time
    /// remaining until it unblocks. A stale entry is removed on the spot
    /// and never blocks.
    pub fn should_block(&self, query: &str) -> Option<Duration> {
        let mut entries = self.entries.lock();
        let record = *entries.get(query)?;
        let age = record.last_failure_at.elapsed();
        if age >= self.reset_window {
            entries.remove(query);
            return None;
        }
        if record.failure_count >= self.max_failed_attempts {
            return Some(self.reset_window - age);
        }
        None
    }

    /// Count one timeout against this query string. A stale record restarts
    /// from one instead of accumulating across windows.
    pub fn record_failure(&self, query: &str) {
        let mut entries = self.entries.lock();
        if entries.len() >= SWEEP_THRESHOLD {
            let window = self.reset_window;
            entries.retain(|_, r| r.last_failure_at.elapsed() < window);
        }
        let now = Instant::now();
        entries
            .entry(query.to_string())
            .and_modify(|r| {
                if r.last_failure_at.elapsed() >= self.reset_window {
                    r.failure_count = 1;
                } else {
                    r.failure_count += 1;
                }
                r.last_failure_at = now;
            })
            .or_insert(FailedQueryRecord {
                failure_count: 1,
                last_failure_at: now,
            });
    }

    /// Tracked query strings, stale entries included until the next sweep.
    pub fn tracked_queries(&self) -> usize {
        self.entries.lock().len()
    }
}
