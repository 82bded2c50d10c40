//! StrataCache - Multi-Tier Cache Manager
//!
//! Layered caching for read-heavy services that sit in front of expensive
//! external calls. Values live in up to three tiers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Cache Manager                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Tier 1 (in-process)  │ Tier 2 (networked)  │ Tier 3 (durable)      │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────┐    │
//! │  │ ShardedMap     │   │ │ TierBackend    │  │ │ TierBackend    │    │
//! │  │ strict LRU     │   │ │ + LZ4 envelope │  │ │ + raw envelope │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────┘    │
//! │          │            │         │           │          │            │
//! │          └────────────┴─────────┴───────────┴──────────┘            │
//! │                 Promotion / Demotion Engine                         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `get` walks the chain warmest-first and promotes what it finds back up;
//! a `set` writes through to the tiers its namespace policy names. Tier 1
//! eviction demotes into Tier 2 instead of discarding. Backend failures
//! degrade to misses; the only error a caller ever sees is an unknown
//! namespace.
//!
//! # Example
//!
//! ```no_run
//! use stratacache::{CacheConfig, CacheManager};
//! use serde_json::json;
//!
//! # async fn demo() -> stratacache::Result<()> {
//! let cache = CacheManager::new(CacheConfig::default())?;
//! cache.set("hot", "kw:seo tools", json!({"volume": 74000}), None).await?;
//! let hit = cache.get("hot", "kw:seo tools").await?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`manager`] - Tier-chain orchestration, the public entry point
//! - [`tier1`] - In-process sharded store with strict LRU eviction
//! - [`tier2`] / [`tier3`] - Cold tiers over pluggable byte backends
//! - [`backend`] - The [`TierBackend`] port and its implementations
//! - [`codec`] - Envelope format and LZ4 compression for cold tiers
//! - [`policy`] - Namespace policy table and configuration
//! - [`metrics`] - Atomic counters and latency EMAs
//! - [`bench`] - Built-in throughput benchmark

pub mod backend;
pub mod bench;
pub mod codec;
pub mod entry;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod shard;
pub mod tier1;
pub mod tier2;
pub mod tier3;

// Re-export commonly used types
pub use backend::{BackendStats, FailingBackend, FileBackend, InMemoryBackend, TierBackend};
pub use bench::{benchmark, BenchmarkReport};
pub use codec::{Compression, Envelope};
pub use entry::{approx_value_size, CacheEntry, CacheKey, CacheTier, EntryMetadata};
pub use error::{Error, Result};
pub use manager::CacheManager;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use policy::{CacheConfig, NamespacePolicy};
pub use tier1::{Tier1Cache, Tier1Config};
pub use tier2::{Tier2Cache, Tier2Config};
pub use tier3::{Tier3Cache, Tier3Config};

/// Default shard count for Tier 1 stores
pub const SHARD_COUNT: usize = 64;

/// Default Tier 1 item budget per namespace
pub const DEFAULT_TIER1_MAX_ITEMS: usize = 10_000;

/// Default Tier 1 byte budget per namespace (64MB)
pub const DEFAULT_TIER1_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Default deadline for Tier 2 backend calls
pub const DEFAULT_TIER2_TIMEOUT_MS: u64 = 250;

/// Default deadline for Tier 3 backend calls
pub const DEFAULT_TIER3_TIMEOUT_MS: u64 = 2_000;

/// Payloads below this size skip LZ4 (compression overhead beats the gain)
pub const MIN_COMPRESS_BYTES: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_count_is_power_of_two() {
        assert!(SHARD_COUNT.is_power_of_two());
    }

    #[test]
    fn test_default_budgets_are_non_zero() {
        assert!(DEFAULT_TIER1_MAX_ITEMS > 0);
        assert!(DEFAULT_TIER1_MAX_BYTES > 0);
        assert!(MIN_COMPRESS_BYTES > 0);
    }
}
