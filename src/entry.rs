//! Cache Entry Types
//!
//! Keys carry pre-computed hashes so shard routing and equality checks stay
//! cheap on the hot path; entry metadata uses atomics so concurrent readers
//! can stamp recency without taking a write lock.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Seconds since the Unix epoch.
#[inline]
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Cache tier identifier, ordered fastest to slowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Tier 1 - in-process (hot)
    Tier1,
    /// Tier 2 - networked store (warm)
    Tier2,
    /// Tier 3 - durable store (cold)
    Tier3,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Tier1 => write!(f, "tier1"),
            CacheTier::Tier2 => write!(f, "tier2"),
            CacheTier::Tier3 => write!(f, "tier3"),
        }
    }
}

/// Cache key - composite of namespace and logical key
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// Namespace hash (for fast comparison)
    ns_hash: u64,
    /// Logical key hash
    key_hash: u64,
    /// Namespace name
    namespace: String,
    /// Logical key within the namespace
    key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        let ns_hash = fx_hash(namespace.as_bytes());
        let key_hash = fx_hash(key.as_bytes());

        Self {
            ns_hash,
            key_hash,
            namespace,
            key,
        }
    }

    /// Get the shard index for this key (0..shard_count)
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        // Power-of-2 shard counts let the modulo collapse to a mask
        (self.combined_hash() as usize) & (shard_count - 1)
    }

    /// Get namespace name
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get logical key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Full key as stored in Tier 2/3 backends: `"{namespace}:{key}"`
    pub fn full(&self) -> String {
        format!("{}:{}", self.namespace, self.key)
    }

    /// Prefix shared by every key in a namespace
    pub fn namespace_prefix(namespace: &str) -> String {
        format!("{}:", namespace)
    }

    /// Get combined hash for quick comparison
    #[inline]
    pub fn combined_hash(&self) -> u64 {
        self.ns_hash ^ self.key_hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        if self.ns_hash != other.ns_hash || self.key_hash != other.key_hash {
            return false;
        }
        self.namespace == other.namespace && self.key == other.key
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Use pre-computed hashes
        self.ns_hash.hash(state);
        self.key_hash.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

/// Metadata for a cached entry
#[derive(Debug)]
pub struct EntryMetadata {
    /// Approximate payload footprint in bytes
    size_bytes: u64,
    /// Creation timestamp (epoch seconds)
    created_at: u64,
    /// Expiry timestamp (epoch seconds); always > created_at
    expires_at: u64,
    /// Recency stamp from the owning store's monotonic tick counter.
    /// Strict LRU ordering needs a total order, which second-granularity
    /// timestamps cannot give.
    last_tick: AtomicU64,
    /// Access count since creation
    access_count: AtomicU32,
    /// Tier this copy currently resides in
    origin: CacheTier,
}

impl EntryMetadata {
    /// Create metadata for a fresh entry with the given TTL
    pub fn new(size_bytes: u64, ttl: Duration, origin: CacheTier) -> Self {
        let now = epoch_secs();
        Self {
            size_bytes,
            created_at: now,
            expires_at: now + ttl.as_secs().max(1),
            last_tick: AtomicU64::new(0),
            access_count: AtomicU32::new(0),
            origin,
        }
    }

    /// Rehydrate metadata from timestamps stored in a cold tier
    pub fn from_timestamps(
        size_bytes: u64,
        created_at: u64,
        expires_at: u64,
        origin: CacheTier,
    ) -> Self {
        Self {
            size_bytes,
            created_at,
            expires_at,
            last_tick: AtomicU64::new(0),
            access_count: AtomicU32::new(0),
            origin,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    #[inline]
    pub fn origin(&self) -> CacheTier {
        self.origin
    }

    /// Stamp an access with the store's current tick
    #[inline]
    pub fn touch(&self, tick: u64) -> u32 {
        self.last_tick.store(tick, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Check whether the entry has passed its expiry (lazy expiry)
    #[inline]
    pub fn is_expired(&self) -> bool {
        epoch_secs() >= self.expires_at
    }

    /// TTL left on the entry, if any
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let now = epoch_secs();
        if now >= self.expires_at {
            None
        } else {
            Some(Duration::from_secs(self.expires_at - now))
        }
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_tick: AtomicU64::new(self.last_tick.load(Ordering::Relaxed)),
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
            origin: self.origin,
        }
    }
}

/// Approximate in-memory footprint of a JSON value, for byte-budget
/// accounting. Does not need to be exact, only consistent.
pub fn approx_value_size(value: &Value) -> u64 {
    const NODE_OVERHEAD: u64 = 16;
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => NODE_OVERHEAD,
        Value::String(s) => NODE_OVERHEAD + s.len() as u64,
        Value::Array(items) => {
            NODE_OVERHEAD + items.iter().map(approx_value_size).sum::<u64>()
        }
        Value::Object(map) => {
            NODE_OVERHEAD
                + map
                    .iter()
                    .map(|(k, v)| k.len() as u64 + approx_value_size(v))
                    .sum::<u64>()
        }
    }
}

/// A cached value plus its bookkeeping.
///
/// The payload is behind an `Arc` so a hit hands the caller a cheap clone
/// while the entry stays resident.
#[derive(Clone)]
pub struct CacheEntry {
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Cached payload
    value: Arc<Value>,
}

impl CacheEntry {
    /// Create a new Tier 1 entry with the given TTL
    pub fn new(value: Value, ttl: Duration) -> Self {
        let size = approx_value_size(&value);
        Self {
            metadata: EntryMetadata::new(size, ttl, CacheTier::Tier1),
            value: Arc::new(value),
        }
    }

    /// Create an entry with existing metadata (tier transfers)
    pub fn with_metadata(value: Arc<Value>, metadata: EntryMetadata) -> Self {
        Self { metadata, value }
    }

    /// Get the payload
    #[inline]
    pub fn value(&self) -> &Arc<Value> {
        &self.value
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.metadata.size_bytes()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("size_bytes", &self.metadata.size_bytes())
            .field("access_count", &self.metadata.access_count())
            .field("origin", &self.metadata.origin())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
