//! Cache Counters
//!
//! Per-process counter set owned by [`super::MetadataCache`]. Counters only
//! ever grow during normal operation; [`CacheCounters::reset`] exists for
//! the admin surface and nothing else calls it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Atomic counter set
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
    invalidations: AtomicU64,
    loads: AtomicU64,

    // Response time of `get` in microseconds (exponential moving average)
    get_latency_us: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// One upstream Loader call.
    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn record_get_latency(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = self.get_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us.max(1)
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .get_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn get_latency(&self) -> Duration {
        Duration::from_micros(self.get_latency_us.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits();
        let misses = self.misses();
        let errors = self.errors();
        CacheStats {
            hits,
            misses,
            sets: self.sets(),
            errors,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            loads: self.loads(),
            hit_rate: percentage(hits, hits + misses),
            error_rate: percentage(errors, hits + misses),
            avg_response_ms: self.get_latency().as_secs_f64() * 1000.0,
        }
    }

    /// Zero every counter. Admin action only.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.loads.store(0, Ordering::Relaxed);
        self.get_latency_us.store(0, Ordering::Relaxed);
    }
}

/// `part / whole` as a percentage, 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Snapshot returned by `MetadataCache::stats()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    pub invalidations: u64,
    pub loads: u64,
    /// hits / (hits + misses), in percent
    pub hit_rate: f64,
    /// errors / (hits + misses), in percent
    pub error_rate: f64,
    /// Moving average of `get` latency
    pub avg_response_ms: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
