//! Cache hit/miss accounting

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Point-in-time view of a cache instance's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that returned nothing, for any reason
    pub misses: u64,
    /// Misses caused by a changed dependency (included in `misses`)
    pub dependency_invalidations: u64,
    /// Writes the backend accepted
    pub writes: u64,
    /// Writes the backend rejected or failed
    pub write_failures: u64,
    /// Average time per lookup (milliseconds)
    pub avg_lookup_time_ms: f64,
    /// Timestamp of cache creation
    pub created_at: SystemTime,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Miss rate as a percentage (0.0 to 100.0)
    pub fn miss_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            100.0 - self.hit_rate()
        }
    }

    /// Share of lookups invalidated by a dependency, as a percentage
    pub fn invalidation_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.dependency_invalidations as f64 / total as f64) * 100.0
        }
    }

    /// Time since the cache was created
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Thread-safe counters shared by every operation of one cache instance
#[derive(Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    dependency_invalidations: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    lookups: AtomicU64,
    total_lookup_time_us: AtomicU64,
    created_at: SystemTime,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            dependency_invalidations: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            total_lookup_time_us: AtomicU64::new(0),
            created_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self, timer: &OperationTimer) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(timer);
    }

    pub fn record_miss(&self, timer: &OperationTimer) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_lookup(timer);
    }

    /// A miss caused by a changed dependency
    pub fn record_invalidation(&self, timer: &OperationTimer) {
        self.dependency_invalidations.fetch_add(1, Ordering::Relaxed);
        self.record_miss(timer);
    }

    pub fn record_write(&self, accepted: bool) {
        if accepted {
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_lookup(&self, timer: &OperationTimer) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.total_lookup_time_us
            .fetch_add(timer.elapsed_us(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let lookups = self.lookups.load(Ordering::Relaxed);
        let total_lookup_time_us = self.total_lookup_time_us.load(Ordering::Relaxed);

        let avg_lookup_time_ms = if lookups > 0 {
            total_lookup_time_us as f64 / lookups as f64 / 1000.0
        } else {
            0.0
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dependency_invalidations: self.dependency_invalidations.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            avg_lookup_time_ms,
            created_at: self.created_at,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.dependency_invalidations.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
        self.lookups.store(0, Ordering::Relaxed);
        self.total_lookup_time_us.store(0, Ordering::Relaxed);
    }

    /// Multi-line human readable summary
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Cache Metrics:\n  Hits: {}\n  Misses: {}\n  Hit Rate: {:.2}%\n  Dependency Invalidations: {}\n  Writes: {}\n  Write Failures: {}\n  Avg Lookup: {:.3}ms",
            stats.hits,
            stats.misses,
            stats.hit_rate(),
            stats.dependency_invalidations,
            stats.writes,
            stats.write_failures,
            stats.avg_lookup_time_ms,
        )
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation timing helper
#[derive(Debug)]
pub struct OperationTimer {
    start_time: Instant,
}

impl OperationTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }
}
