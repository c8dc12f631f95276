// SPDX-License-Identifier: MIT
//
// SpoolTag: Filament Spool Tag Reader
// Copyright (c) 2025 SpoolTag Contributors
//
// https://github.com/spooltag/spooltag

//! Per-tier cache counters

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache tier a counter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Persistent,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => f.write_str("memory"),
            CacheTier::Persistent => f.write_str("persistent"),
        }
    }
}

#[derive(Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
    }
}

/// Shared statistics handle for one two-tier cache
#[derive(Clone, Default)]
pub struct CacheStatistics {
    inner: Arc<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    memory: TierCounters,
    persistent: TierCounters,
}

/// Point-in-time counters of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub invalidations: u64,
    pub evictions: u64,
    /// Memory tier: entries promoted in from persistent. Persistent tier:
    /// evicted memory entries written back during the grace window.
    pub promotions: u64,
}

impl TierStats {
    /// hits / (hits + misses), 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Point-in-time counters of both tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub memory: TierStats,
    pub persistent: TierStats,
}

impl StatsSnapshot {
    pub fn tier(&self, tier: CacheTier) -> &TierStats {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Persistent => &self.persistent,
        }
    }
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::Memory => &self.inner.memory,
            CacheTier::Persistent => &self.inner.persistent,
        }
    }

    pub fn record_hit(&self, tier: CacheTier) {
        self.counters(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: CacheTier) {
        self.counters(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, tier: CacheTier) {
        self.counters(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, tier: CacheTier) {
        self.counters(tier).invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, tier: CacheTier) {
        self.counters(tier).evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self, tier: CacheTier) {
        self.counters(tier).promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            memory: self.inner.memory.snapshot(),
            persistent: self.inner.persistent.snapshot(),
        }
    }

    pub fn reset(&self) {
        self.inner.memory.reset();
        self.inner.persistent.reset();
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self, cache: &str) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let series: [(&str, &str, fn(&TierStats) -> u64); 6] = [
            ("hits", "Cache hits", |s| s.hits),
            ("misses", "Cache misses", |s| s.misses),
            ("errors", "Cache tier errors", |s| s.errors),
            ("invalidations", "Explicit invalidations", |s| s.invalidations),
            ("evictions", "Capacity or TTL evictions", |s| s.evictions),
            ("promotions", "Cross-tier promotions", |s| s.promotions),
        ];

        for (name, help, value) in series {
            output.push_str(&format!("# HELP spooltag_cache_{} {}\n", name, help));
            output.push_str(&format!("# TYPE spooltag_cache_{} counter\n", name));
            for tier in [CacheTier::Memory, CacheTier::Persistent] {
                output.push_str(&format!(
                    "spooltag_cache_{}{{cache=\"{}\",tier=\"{}\"}} {}\n",
                    name,
                    cache,
                    tier,
                    value(snapshot.tier(tier))
                ));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_per_tier() {
        let stats = CacheStatistics::new();
        stats.record_hit(CacheTier::Memory);
        stats.record_hit(CacheTier::Memory);
        stats.record_miss(CacheTier::Memory);
        stats.record_error(CacheTier::Persistent);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.memory.hits, 2);
        assert_eq!(snapshot.memory.misses, 1);
        assert_eq!(snapshot.persistent.errors, 1);
        assert_eq!(snapshot.persistent.hits, 0);
        assert!((snapshot.memory.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.persistent.hit_rate(), 0.0);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_prometheus_format() {
        let stats = CacheStatistics::new();
        stats.record_miss(CacheTier::Persistent);
        let text = stats.prometheus_format("keys");
        assert!(text.contains("spooltag_cache_misses{cache=\"keys\",tier=\"persistent\"} 1"));
        assert!(text.contains("spooltag_cache_hits{cache=\"keys\",tier=\"memory\"} 0"));
    }
}
