//! Cache Metrics
//!
//! Hot-path counters are plain atomics updated with relaxed increments so a
//! read never takes a lock to be counted. Per-tier latency is an exponential
//! moving average updated through a CAS loop. A monitoring endpoint polls
//! [`CacheMetrics::snapshot`]; nothing is pushed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::entry::CacheTier;

/// EMA smoothing factor for latency tracking
const LATENCY_ALPHA: f64 = 0.1;

/// Per-tier counter block
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

/// Cache-wide metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    tier1: TierCounters,
    tier2: TierCounters,
    tier3: TierCounters,

    /// Copies into warmer tiers on the lookup path
    promotions: AtomicU64,
    /// Tier1 -> Tier2 demotions
    demotions_tier1_to_tier2: AtomicU64,
    /// Tier2 -> Tier3 demotions
    demotions_tier2_to_tier3: AtomicU64,
    /// Writes through the manager
    sets: AtomicU64,
    /// Explicit invalidations (key or namespace)
    invalidations: AtomicU64,
    /// Backend failures absorbed into misses or skipped writes
    degraded_ops: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, tier: CacheTier) -> &TierCounters {
        match tier {
            CacheTier::Tier1 => &self.tier1,
            CacheTier::Tier2 => &self.tier2,
            CacheTier::Tier3 => &self.tier3,
        }
    }

    pub fn record_hit(&self, tier: CacheTier) {
        self.counters(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: CacheTier) {
        self.counters(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, tier: CacheTier, duration: Duration) {
        update_latency_ema(&self.counters(tier).read_latency_us, duration);
    }

    pub fn record_write_latency(&self, tier: CacheTier, duration: Duration) {
        update_latency_ema(&self.counters(tier).write_latency_us, duration);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion_tier1_to_tier2(&self) {
        self.demotions_tier1_to_tier2.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion_tier2_to_tier3(&self) {
        self.demotions_tier2_to_tier3.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_op(&self) {
        self.degraded_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self, tier: CacheTier) -> u64 {
        self.counters(tier).hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self, tier: CacheTier) -> u64 {
        self.counters(tier).misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self, tier: CacheTier) -> f64 {
        let hits = self.hits(tier) as f64;
        let total = hits + self.misses(tier) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Overall ratio: a hit anywhere over hits plus end-of-chain misses
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.hits(CacheTier::Tier1)
            + self.hits(CacheTier::Tier2)
            + self.hits(CacheTier::Tier3);
        let total = hits + self.misses(CacheTier::Tier3);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn read_latency(&self, tier: CacheTier) -> Duration {
        Duration::from_micros(self.counters(tier).read_latency_us.load(Ordering::Relaxed))
    }

    pub fn write_latency(&self, tier: CacheTier) -> Duration {
        Duration::from_micros(self.counters(tier).write_latency_us.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every counter.
    ///
    /// Eviction and expiration totals are owned by the tier stores, which
    /// see capacity eviction and lazy expiry directly; `CacheManager::metrics`
    /// fills those fields in from the store counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            taken_at: chrono::Utc::now(),

            tier1_hits: self.hits(CacheTier::Tier1),
            tier1_misses: self.misses(CacheTier::Tier1),
            tier1_hit_ratio: self.hit_ratio(CacheTier::Tier1),
            tier1_read_latency_us: self.read_latency(CacheTier::Tier1).as_micros() as u64,
            tier1_write_latency_us: self.write_latency(CacheTier::Tier1).as_micros() as u64,

            tier2_hits: self.hits(CacheTier::Tier2),
            tier2_misses: self.misses(CacheTier::Tier2),
            tier2_hit_ratio: self.hit_ratio(CacheTier::Tier2),
            tier2_read_latency_us: self.read_latency(CacheTier::Tier2).as_micros() as u64,
            tier2_write_latency_us: self.write_latency(CacheTier::Tier2).as_micros() as u64,

            tier3_hits: self.hits(CacheTier::Tier3),
            tier3_misses: self.misses(CacheTier::Tier3),
            tier3_hit_ratio: self.hit_ratio(CacheTier::Tier3),
            tier3_read_latency_us: self.read_latency(CacheTier::Tier3).as_micros() as u64,
            tier3_write_latency_us: self.write_latency(CacheTier::Tier3).as_micros() as u64,

            overall_hit_ratio: self.overall_hit_ratio(),
            evictions: 0,
            expirations: 0,
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions_tier1_to_tier2: self.demotions_tier1_to_tier2.load(Ordering::Relaxed),
            demotions_tier2_to_tier3: self.demotions_tier2_to_tier3.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            degraded_ops: self.degraded_ops.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for tier in [CacheTier::Tier1, CacheTier::Tier2, CacheTier::Tier3] {
            let c = self.counters(tier);
            c.hits.store(0, Ordering::Relaxed);
            c.misses.store(0, Ordering::Relaxed);
            c.read_latency_us.store(0, Ordering::Relaxed);
            c.write_latency_us.store(0, Ordering::Relaxed);
        }
        self.promotions.store(0, Ordering::Relaxed);
        self.demotions_tier1_to_tier2.store(0, Ordering::Relaxed);
        self.demotions_tier2_to_tier3.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.degraded_ops.store(0, Ordering::Relaxed);
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - LATENCY_ALPHA) * current as f64 + LATENCY_ALPHA * new_us as f64) as u64
        };
        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Point-in-time view of the collector, serializable for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken
    pub taken_at: chrono::DateTime<chrono::Utc>,

    pub tier1_hits: u64,
    pub tier1_misses: u64,
    pub tier1_hit_ratio: f64,
    pub tier1_read_latency_us: u64,
    pub tier1_write_latency_us: u64,

    pub tier2_hits: u64,
    pub tier2_misses: u64,
    pub tier2_hit_ratio: f64,
    pub tier2_read_latency_us: u64,
    pub tier2_write_latency_us: u64,

    pub tier3_hits: u64,
    pub tier3_misses: u64,
    pub tier3_hit_ratio: f64,
    pub tier3_read_latency_us: u64,
    pub tier3_write_latency_us: u64,

    pub overall_hit_ratio: f64,
    /// Tier 1 capacity evictions, summed over the namespace stores
    pub evictions: u64,
    /// Entries dropped past their TTL (lazy reads and sweeps), all tiers
    pub expirations: u64,
    pub promotions: u64,
    pub demotions_tier1_to_tier2: u64,
    pub demotions_tier2_to_tier3: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub degraded_ops: u64,
}

// =============================================================================
// Tests
// =============================================================================
