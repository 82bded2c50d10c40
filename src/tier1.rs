//! Tier 1 - In-Process Store
//!
//! Lowest-latency tier: a sharded map with strict LRU eviction and lazy TTL
//! expiry. Reads take only a shard read lock and stamp recency through an
//! atomic, so concurrent readers never block each other and a write to one
//! key never blocks a read of another.
//!
//! # Eviction
//!
//! Every access stamps the entry with a globally increasing tick. When a
//! budget (item count or bytes) would be exceeded, the victim is the entry
//! with the smallest tick among non-expired entries; expired entries are
//! always taken first. Budgets are freed before the new entry is inserted,
//! so capacity is never observably exceeded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::entry::{CacheEntry, CacheKey};
use crate::shard::ShardedMap;
use crate::{DEFAULT_TIER1_MAX_BYTES, DEFAULT_TIER1_MAX_ITEMS, SHARD_COUNT};

/// Tier 1 store configuration
#[derive(Debug, Clone)]
pub struct Tier1Config {
    /// Maximum number of resident entries
    pub max_items: usize,
    /// Maximum total approximate payload bytes
    pub max_bytes: u64,
    /// Shard count (power of two)
    pub shard_count: usize,
}

impl Default for Tier1Config {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_TIER1_MAX_ITEMS,
            max_bytes: DEFAULT_TIER1_MAX_BYTES,
            shard_count: SHARD_COUNT,
        }
    }
}

/// Tier 1 cache - in-process hot store
pub struct Tier1Cache {
    storage: ShardedMap,
    config: Tier1Config,
    /// Monotonic recency counter; one tick per access or insert
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Tier1Cache {
    pub fn new() -> Self {
        Self::with_config(Tier1Config::default())
    }

    pub fn with_config(config: Tier1Config) -> Self {
        Self {
            storage: ShardedMap::new(config.shard_count),
            config,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get an entry. Expired entries are treated as absent and removed.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.storage.get_touched(key, self.next_tick()) {
            Some(entry) if entry.is_expired() => {
                // A racing put may have replaced the entry since our read;
                // only drop the one we actually observed
                let removed = self
                    .storage
                    .remove_if(key, |resident| Arc::ptr_eq(resident.value(), entry.value()));
                if removed.is_some() {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, evicting as needed to stay within budget.
    ///
    /// Returns the non-expired entries evicted to make room, so the caller
    /// can demote them to a colder tier. An entry larger than the byte
    /// budget is rejected outright.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> Vec<(CacheKey, CacheEntry)> {
        let size = entry.size_bytes();
        if size > self.config.max_bytes {
            tracing::debug!(key = %key, size, "entry exceeds tier1 byte budget, not cached");
            return Vec::new();
        }

        // Replacing in place first keeps the budget math simple
        self.storage.remove(&key);

        let mut demoted = Vec::new();
        while self.storage.len() >= self.config.max_items
            || self.storage.bytes() + size > self.config.max_bytes
        {
            match self.evict_victim() {
                Some(victim) => {
                    if let Some(v) = victim {
                        demoted.push(v);
                    }
                }
                None => break,
            }
        }

        entry.metadata.touch(self.next_tick());
        self.storage.insert(key, entry);

        // Racing inserts can momentarily overshoot; re-check so the budget
        // holds once the dust settles
        while self.storage.len() > self.config.max_items
            || self.storage.bytes() > self.config.max_bytes
        {
            match self.evict_victim() {
                Some(Some(v)) => demoted.push(v),
                Some(None) => continue,
                None => break,
            }
        }
        demoted
    }

    /// Remove and return the least-recently-used unexpired entry.
    ///
    /// Expired entries found along the way are dropped first without being
    /// returned; they are never worth demoting.
    pub fn evict_one(&self) -> Option<(CacheKey, CacheEntry)> {
        loop {
            match self.evict_victim()? {
                Some(evicted) => return Some(evicted),
                // An expired entry was dropped; keep looking
                None => continue,
            }
        }
    }

    /// Evict a single victim. Outer `None` means the store is empty; inner
    /// `None` means the victim was expired and discarded.
    #[allow(clippy::type_complexity)]
    fn evict_victim(&self) -> Option<Option<(CacheKey, CacheEntry)>> {
        let mut expired_key: Option<CacheKey> = None;
        let mut lru: Option<(CacheKey, u64)> = None;

        self.storage.for_each(|key, entry| {
            if expired_key.is_some() {
                return;
            }
            if entry.is_expired() {
                expired_key = Some(key.clone());
                return;
            }
            let tick = entry.metadata.last_tick();
            match &lru {
                Some((_, best)) if *best <= tick => {}
                _ => lru = Some((key.clone(), tick)),
            }
        });

        if let Some(key) = expired_key {
            if self.storage.remove(&key).is_some() {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
            return Some(None);
        }

        let (key, _) = lru?;
        let entry = self.storage.remove(&key)?;
        self.evictions.fetch_add(1, Ordering::Relaxed);
        Some(Some((key, entry)))
    }

    /// Remove an entry by key
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.storage.remove(key)
    }

    /// Remove every entry whose logical key starts with `prefix`
    pub fn remove_matching(&self, prefix: &str) -> usize {
        self.storage.retain(|key, _| !key.key().starts_with(prefix))
    }

    /// Drop all expired entries eagerly (periodic sweep)
    pub fn sweep_expired(&self) -> usize {
        let removed = self.storage.retain(|_, entry| !entry.is_expired());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.storage.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.storage.bytes()
    }

    pub fn max_items(&self) -> usize {
        self.config.max_items
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Zero the hit/miss/eviction/expiration counters
    pub fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.storage.clear();
    }
}

impl Default for Tier1Cache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{epoch_secs, CacheTier, EntryMetadata};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn small_config(max_items: usize) -> Tier1Config {
        Tier1Config {
            max_items,
            max_bytes: 1024 * 1024,
            shard_count: 8,
        }
    }

    fn key(k: &str) -> CacheKey {
        CacheKey::new("hot", k)
    }

    fn entry(v: serde_json::Value) -> CacheEntry {
        CacheEntry::new(v, Duration::from_secs(300))
    }

    fn expired_entry(v: serde_json::Value) -> CacheEntry {
        let meta = EntryMetadata::from_timestamps(
            crate::entry::approx_value_size(&v),
            epoch_secs() - 100,
            epoch_secs() - 1,
            CacheTier::Tier1,
        );
        CacheEntry::with_metadata(Arc::new(v), meta)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = Tier1Cache::with_config(small_config(10));

        cache.put(key("kw:seo tools"), entry(json!({"word_count": 954})));
        let got = cache.get(&key("kw:seo tools")).unwrap();
        assert_eq!(**got.value(), json!({"word_count": 954}));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let cache = Tier1Cache::with_config(small_config(10));
        assert!(cache.get(&key("absent")).is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_expired_entry_reads_as_absent_and_is_removed() {
        let cache = Tier1Cache::with_config(small_config(10));
        cache.put(key("stale"), expired_entry(json!(1)));

        assert!(cache.get(&key("stale")).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.expirations(), 1);
    }

    #[test]
    fn test_strict_lru_eviction_order() {
        let cache = Tier1Cache::with_config(small_config(4));

        for i in 1..=4 {
            cache.put(key(&format!("k{}", i)), entry(json!(i)));
        }

        // Refresh k1 so k2 becomes the LRU entry
        cache.get(&key("k1")).unwrap();

        cache.put(key("k5"), entry(json!(5)));

        assert!(cache.contains(&key("k1")), "refreshed entry must survive");
        assert!(!cache.contains(&key("k2")), "LRU entry must be evicted");
        assert!(cache.contains(&key("k3")));
        assert!(cache.contains(&key("k4")));
        assert!(cache.contains(&key("k5")));
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn test_item_budget_is_exact() {
        let cache = Tier1Cache::with_config(small_config(3));

        for i in 0..50 {
            cache.put(key(&format!("k{}", i)), entry(json!(i)));
            assert!(cache.len() <= 3, "item budget exceeded at insert {}", i);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_byte_budget_forces_eviction() {
        let config = Tier1Config {
            max_items: 1000,
            max_bytes: 2000,
            shard_count: 8,
        };
        let cache = Tier1Cache::with_config(config);

        for i in 0..20 {
            cache.put(key(&format!("k{}", i)), entry(json!("x".repeat(200))));
            assert!(cache.bytes() <= 2000, "byte budget exceeded at insert {}", i);
        }
        assert!(cache.evictions() > 0);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let config = Tier1Config {
            max_items: 10,
            max_bytes: 100,
            shard_count: 8,
        };
        let cache = Tier1Cache::with_config(config);

        let demoted = cache.put(key("huge"), entry(json!("x".repeat(500))));
        assert!(demoted.is_empty());
        assert!(!cache.contains(&key("huge")));
    }

    #[test]
    fn test_expired_entries_evicted_before_lru() {
        let cache = Tier1Cache::with_config(small_config(3));

        cache.put(key("old-but-live"), entry(json!(1)));
        cache.put(key("stale"), expired_entry(json!(2)));
        cache.put(key("fresh"), entry(json!(3)));

        // Needs one slot; the expired entry must go, not the true LRU
        cache.put(key("new"), entry(json!(4)));

        assert!(cache.contains(&key("old-but-live")));
        assert!(!cache.contains(&key("stale")));
        assert_eq!(cache.evictions(), 0);
        assert!(cache.expirations() >= 1);
    }

    #[test]
    fn test_put_returns_evicted_entries_for_demotion() {
        let cache = Tier1Cache::with_config(small_config(2));

        cache.put(key("a"), entry(json!("alpha")));
        cache.put(key("b"), entry(json!("beta")));
        let demoted = cache.put(key("c"), entry(json!("gamma")));

        assert_eq!(demoted.len(), 1);
        assert_eq!(demoted[0].0.key(), "a");
        assert_eq!(**demoted[0].1.value(), json!("alpha"));
    }

    #[test]
    fn test_evict_one_skips_expired() {
        let cache = Tier1Cache::with_config(small_config(10));

        cache.put(key("stale"), expired_entry(json!(1)));
        cache.put(key("live"), entry(json!(2)));

        let (k, _) = cache.evict_one().unwrap();
        assert_eq!(k.key(), "live");
        assert!(cache.is_empty(), "expired entry dropped along the way");
    }

    #[test]
    fn test_evict_one_empty() {
        let cache = Tier1Cache::with_config(small_config(10));
        assert!(cache.evict_one().is_none());
    }

    #[test]
    fn test_remove_matching_prefix() {
        let cache = Tier1Cache::with_config(small_config(10));

        cache.put(key("kw:rust"), entry(json!(1)));
        cache.put(key("kw:go"), entry(json!(2)));
        cache.put(key("serp:rust"), entry(json!(3)));

        let removed = cache.remove_matching("kw:");
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key("serp:rust")));
    }

    #[test]
    fn test_sweep_expired() {
        let cache = Tier1Cache::with_config(small_config(10));

        cache.put(key("live"), entry(json!(1)));
        cache.put(key("stale-1"), expired_entry(json!(2)));
        cache.put(key("stale-2"), expired_entry(json!(3)));

        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_idempotent_put() {
        let cache = Tier1Cache::with_config(small_config(5));

        cache.put(key("a"), entry(json!({"v": 1})));
        cache.put(key("a"), entry(json!({"v": 1})));

        assert_eq!(cache.len(), 1);
        assert_eq!(**cache.get(&key("a")).unwrap().value(), json!({"v": 1}));
    }

    #[test]
    fn test_concurrent_readers_same_key() {
        use std::thread;

        let cache = Arc::new(Tier1Cache::with_config(small_config(100)));
        cache.put(key("shared"), entry(json!({"sentinel": 42})));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let got = cache.get(&key("shared")).unwrap();
                        assert_eq!(**got.value(), json!({"sentinel": 42}));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.hits(), 8000);
    }

    #[test]
    fn test_concurrent_mixed_load_respects_budget() {
        use std::thread;

        let cache = Arc::new(Tier1Cache::with_config(small_config(64)));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let k = key(&format!("k-{}-{}", t, i));
                        cache.put(k.clone(), entry(json!(i)));
                        cache.get(&k);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.len() <= 64);
    }
}
