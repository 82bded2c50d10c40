//! Sharded Map
//!
//! Concurrent hashmap split into N independently locked shards so readers of
//! unrelated keys never contend. Shard routing uses the key's pre-computed
//! hash; N must be a power of two so the modulo collapses to a mask.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::entry::{CacheEntry, CacheKey};

/// Single shard: a hashmap behind its own RwLock plus size accounting
pub struct Shard {
    map: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Number of entries
    count: AtomicU64,
    /// Total approximate payload bytes
    bytes: AtomicU64,
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

impl Shard {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Clone-out read; holds the shard read lock only for the lookup
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let guard = self.map.read();
        guard.get(key).cloned()
    }

    /// Clone-out read that stamps recency on the resident entry first.
    /// Touching the clone would be lost; the clone carries fresh atomics.
    pub fn get_touched(&self, key: &CacheKey, tick: u64) -> Option<CacheEntry> {
        let guard = self.map.read();
        guard.get(key).map(|entry| {
            entry.metadata.touch(tick);
            entry.clone()
        })
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        let guard = self.map.read();
        guard.contains_key(key)
    }

    /// Insert or replace, returning the previous entry if any
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> Option<CacheEntry> {
        let size = entry.size_bytes();
        let mut guard = self.map.write();
        let old = guard.insert(key, entry);
        drop(guard);

        match &old {
            Some(old_entry) => {
                let old_size = old_entry.size_bytes();
                if size >= old_size {
                    self.bytes.fetch_add(size - old_size, Ordering::Relaxed);
                } else {
                    self.bytes.fetch_sub(old_size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.count.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(size, Ordering::Relaxed);
            }
        }

        old
    }

    /// Remove an entry, returning it if present
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut guard = self.map.write();
        let removed = guard.remove(key);
        drop(guard);

        if let Some(entry) = &removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.bytes.fetch_sub(entry.size_bytes(), Ordering::Relaxed);
        }
        removed
    }

    /// Remove an entry only if the resident entry satisfies the predicate.
    ///
    /// Check and removal happen under one write lock, so a caller holding a
    /// stale clone can refuse to delete an entry that was replaced since.
    pub fn remove_if<F>(&self, key: &CacheKey, pred: F) -> Option<CacheEntry>
    where
        F: FnOnce(&CacheEntry) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(pred) {
            return None;
        }
        let removed = guard.remove(key);
        drop(guard);

        if let Some(entry) = &removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
            self.bytes.fetch_sub(entry.size_bytes(), Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry failing the predicate, returning how many went
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&CacheKey, &CacheEntry) -> bool,
    {
        let mut guard = self.map.write();
        let before = guard.len();
        let mut freed = 0u64;
        guard.retain(|k, v| {
            if keep(k, v) {
                true
            } else {
                freed += v.size_bytes();
                false
            }
        });
        let removed = before - guard.len();
        drop(guard);

        self.count.fetch_sub(removed as u64, Ordering::Relaxed);
        self.bytes.fetch_sub(freed, Ordering::Relaxed);
        removed
    }

    /// Visit every resident entry under the read lock
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&CacheKey, &CacheEntry),
    {
        let guard = self.map.read();
        for (k, v) in guard.iter() {
            f(k, v);
        }
    }

    pub fn clear(&self) {
        let mut guard = self.map.write();
        guard.clear();
        drop(guard);
        self.count.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

/// Sharded map over [`CacheKey`] with a fixed power-of-two shard count
pub struct ShardedMap {
    shards: Box<[Shard]>,
}

impl ShardedMap {
    /// Create a sharded map; `shard_count` must be a power of two
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let shards: Vec<Shard> = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_for(&self, key: &CacheKey) -> &Shard {
        &self.shards[key.shard_index(self.shards.len())]
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes()).sum()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.shard_for(key).get(key)
    }

    pub fn get_touched(&self, key: &CacheKey, tick: u64) -> Option<CacheEntry> {
        self.shard_for(key).get_touched(key, tick)
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.shard_for(key).contains_key(key)
    }

    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> Option<CacheEntry> {
        self.shard_for(&key).insert(key, entry)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.shard_for(key).remove(key)
    }

    pub fn remove_if<F>(&self, key: &CacheKey, pred: F) -> Option<CacheEntry>
    where
        F: FnOnce(&CacheEntry) -> bool,
    {
        self.shard_for(key).remove_if(key, pred)
    }

    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&CacheKey, &CacheEntry) -> bool,
    {
        self.shards.iter().map(|s| s.retain(&mut keep)).sum()
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&CacheKey, &CacheEntry),
    {
        for shard in self.shards.iter() {
            shard.for_each(&mut f);
        }
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
