//! Engine query counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub query_count: u64,
    pub avg_latency_ms: f64,
    pub cache_hit_rate: f64,
}

/// Lock-free query counters shared across concurrent queries
#[derive(Debug, Default)]
pub struct EngineStats {
    query_count: AtomicU64,
    total_latency_us: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed query
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache_hit_rate: f64) -> StatsSnapshot {
        let query_count = self.query_count.load(Ordering::Relaxed);
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let avg_latency_ms = if query_count > 0 {
            total_us as f64 / query_count as f64 / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            query_count,
            avg_latency_ms,
            cache_hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = EngineStats::new();
        assert_eq!(stats.snapshot(0.0), StatsSnapshot::default());
    }

    #[test]
    fn test_average_latency() {
        let stats = EngineStats::new();
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(30));

        let snapshot = stats.snapshot(0.25);
        assert_eq!(snapshot.query_count, 2);
        assert!((snapshot.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.cache_hit_rate, 0.25);
    }
}
