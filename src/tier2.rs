//! Tier 2 - Networked Warm Cache
//!
//! Second tier in the read path. Entries arrive here by write-through fan-out
//! and by demotion from Tier 1, stored as LZ4-compressed envelopes in a
//! pluggable [`TierBackend`]. Every backend call is bounded by a deadline so
//! a slow store degrades to a miss instead of stalling the caller.
//!
//! An optional byte budget is enforced through a residency index: when a put
//! pushes the tier over budget, the least-recently-used residents are handed
//! back to the caller for demotion to Tier 3.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::backend::TierBackend;
use crate::codec::{self, CodecConfig, Envelope};
use crate::error::{Error, Result};

/// Tier 2 configuration
#[derive(Debug, Clone)]
pub struct Tier2Config {
    /// Deadline for each backend operation
    pub op_timeout: Duration,
    /// Byte budget; `None` leaves capacity to the backend
    pub max_bytes: Option<u64>,
    /// Envelope codec settings
    pub codec: CodecConfig,
}

impl Default for Tier2Config {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(crate::DEFAULT_TIER2_TIMEOUT_MS),
            max_bytes: None,
            codec: CodecConfig::default(),
        }
    }
}

/// Residency record for the byte budget
struct IndexEntry {
    size: u64,
    last_tick: u64,
}

/// Warm tier over a pluggable backend
pub struct Tier2Cache {
    backend: Arc<dyn TierBackend>,
    config: Tier2Config,

    /// Residency index (full key -> size and recency)
    index: DashMap<String, IndexEntry>,
    /// Bytes accounted in the index
    indexed_bytes: AtomicU64,
    /// Recency clock for the index
    tick: AtomicU64,

    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl Tier2Cache {
    pub fn new(backend: Arc<dyn TierBackend>, config: Tier2Config) -> Self {
        Self {
            backend,
            config,
            index: DashMap::new(),
            indexed_bytes: AtomicU64::new(0),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                tier: "tier2",
                millis: self.config.op_timeout.as_millis() as u64,
            }),
        }
    }

    fn index_insert(&self, full_key: &str, size: u64) {
        let tick = self.next_tick();
        match self.index.insert(full_key.to_string(), IndexEntry { size, last_tick: tick }) {
            Some(old) => {
                if size >= old.size {
                    self.indexed_bytes.fetch_add(size - old.size, Ordering::Relaxed);
                } else {
                    self.indexed_bytes.fetch_sub(old.size - size, Ordering::Relaxed);
                }
            }
            None => {
                self.indexed_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
    }

    fn index_remove(&self, full_key: &str) {
        if let Some((_, old)) = self.index.remove(full_key) {
            self.indexed_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
    }

    fn index_touch(&self, full_key: &str) {
        let tick = self.next_tick();
        if let Some(mut entry) = self.index.get_mut(full_key) {
            entry.last_tick = tick;
        }
    }

    /// Least-recently-used indexed key, if any
    fn lru_key(&self) -> Option<String> {
        let mut victim: Option<(String, u64)> = None;
        for item in self.index.iter() {
            match &victim {
                Some((_, best)) if item.last_tick >= *best => {}
                _ => victim = Some((item.key().clone(), item.last_tick)),
            }
        }
        victim.map(|(k, _)| k)
    }

    /// Fetch an entry, dropping it if expired.
    ///
    /// Expiry is enforced here from the envelope timestamps, so entries that
    /// outlive their TTL inside the backend are still never served.
    pub async fn get(&self, full_key: &str) -> Result<Option<Envelope>> {
        let data = self.bounded(self.backend.get(full_key)).await?;
        let Some(data) = data else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let envelope = codec::decode(&data)?;
        if envelope.is_expired() {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.index_remove(full_key);
            // Best-effort cleanup; a failure here just leaves garbage behind
            if let Err(e) = self.bounded(self.backend.remove(full_key)).await {
                tracing::debug!(key = full_key, error = %e, "failed to drop expired tier2 entry");
            }
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        self.index_touch(full_key);
        Ok(Some(envelope))
    }

    /// Store an entry, returning envelopes pushed out by the byte budget.
    ///
    /// Already-expired demotion candidates are discarded rather than
    /// returned.
    pub async fn put(&self, full_key: &str, envelope: &Envelope) -> Result<Vec<(String, Envelope)>> {
        let data = codec::encode(envelope, &self.config.codec)?;
        let size = data.len() as u64;

        self.bounded(self.backend.put(full_key, data)).await?;
        self.index_insert(full_key, size);

        let Some(budget) = self.config.max_bytes else {
            return Ok(Vec::new());
        };

        let mut demoted = Vec::new();
        while self.indexed_bytes.load(Ordering::Relaxed) > budget {
            let Some(victim) = self.lru_key() else { break };
            if victim == full_key && self.index.len() == 1 {
                // A single entry over budget stays; there is nothing to trade
                break;
            }

            let raw = self.bounded(self.backend.get(&victim)).await?;
            self.index_remove(&victim);
            self.bounded(self.backend.remove(&victim)).await?;

            if let Some(raw) = raw {
                let victim_env = codec::decode(&raw)?;
                if !victim_env.is_expired() {
                    demoted.push((victim, victim_env));
                } else {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(demoted)
    }

    /// Remove a single entry
    pub async fn remove(&self, full_key: &str) -> Result<bool> {
        self.index_remove(full_key);
        self.bounded(self.backend.remove(full_key)).await
    }

    /// Remove every entry under a namespace prefix
    pub async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let mut freed = 0u64;
        self.index.retain(|k, v| {
            if k.starts_with(prefix) {
                freed += v.size;
                false
            } else {
                true
            }
        });
        self.indexed_bytes.fetch_sub(freed, Ordering::Relaxed);
        self.bounded(self.backend.remove_prefix(prefix)).await
    }

    /// Scan the backend and drop every expired entry
    pub async fn sweep_expired(&self) -> Result<u64> {
        let keys = self.bounded(self.backend.keys()).await?;
        let mut swept = 0u64;
        for key in keys {
            let Some(data) = self.bounded(self.backend.get(&key)).await? else {
                continue;
            };
            let expired = match codec::peek_expires_at(&data) {
                Some(expires_at) => crate::entry::epoch_secs() >= expires_at,
                // Unreadable entries are garbage; sweep them too
                None => true,
            };
            if expired {
                self.index_remove(&key);
                self.bounded(self.backend.remove(&key)).await?;
                self.expirations.fetch_add(1, Ordering::Relaxed);
                swept += 1;
            }
        }
        Ok(swept)
    }

    pub fn indexed_bytes(&self) -> u64 {
        self.indexed_bytes.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Zero the hit/miss/expiration counters
    pub fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::entry::epoch_secs;
    use serde_json::json;

    fn tier2() -> Tier2Cache {
        Tier2Cache::new(Arc::new(InMemoryBackend::new()), Tier2Config::default())
    }

    fn envelope(value: serde_json::Value, ttl_secs: u64) -> Envelope {
        let now = epoch_secs();
        Envelope {
            created_at: now,
            expires_at: now + ttl_secs,
            value,
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = tier2();
        let env = envelope(json!({"rank": 3}), 300);

        let demoted = cache.put("serp:kw-1", &env).await.unwrap();
        assert!(demoted.is_empty());

        let got = cache.get("serp:kw-1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"rank": 3}));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_miss_counts() {
        let cache = tier2();
        assert!(cache.get("serp:absent").await.unwrap().is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let cache = tier2();
        let now = epoch_secs();
        let env = Envelope {
            created_at: now - 100,
            expires_at: now - 10,
            value: json!("stale"),
        };

        cache.put("serp:old", &env).await.unwrap();
        assert!(cache.get("serp:old").await.unwrap().is_none());
        assert_eq!(cache.expirations(), 1);
        // Removed from the backend on first touch
        assert_eq!(cache.indexed_bytes(), 0);
    }

    #[tokio::test]
    async fn test_remove_prefix_clears_namespace() {
        let cache = tier2();
        cache.put("serp:a", &envelope(json!(1), 300)).await.unwrap();
        cache.put("serp:b", &envelope(json!(2), 300)).await.unwrap();
        cache.put("audits:a", &envelope(json!(3), 300)).await.unwrap();

        let removed = cache.remove_prefix("serp:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("serp:a").await.unwrap().is_none());
        assert!(cache.get("audits:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_byte_budget_demotes_lru() {
        let backend = Arc::new(InMemoryBackend::new());
        let cache = Tier2Cache::new(
            backend,
            Tier2Config {
                max_bytes: Some(300),
                ..Tier2Config::default()
            },
        );

        // ~100 encoded bytes each
        let payload = || envelope(json!({"body": "x".repeat(80)}), 300);
        cache.put("ns:a", &payload()).await.unwrap();
        cache.put("ns:b", &payload()).await.unwrap();
        // Refresh a's recency so b is the LRU resident
        cache.get("ns:a").await.unwrap();

        let mut demoted = Vec::new();
        demoted.extend(cache.put("ns:c", &payload()).await.unwrap());
        demoted.extend(cache.put("ns:d", &payload()).await.unwrap());

        assert!(!demoted.is_empty());
        assert_eq!(demoted[0].0, "ns:b");
        assert!(cache.indexed_bytes() <= 300);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let cache = tier2();
        let now = epoch_secs();
        cache
            .put(
                "ns:dead",
                &Envelope {
                    created_at: now - 50,
                    expires_at: now - 1,
                    value: json!(1),
                },
            )
            .await
            .unwrap();
        cache.put("ns:live", &envelope(json!(2), 300)).await.unwrap();

        let swept = cache.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert!(cache.get("ns:live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_error() {
        struct SlowBackend;

        #[async_trait::async_trait]
        impl TierBackend for SlowBackend {
            async fn get(&self, _: &str) -> crate::error::Result<Option<bytes::Bytes>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            async fn put(&self, _: &str, _: bytes::Bytes) -> crate::error::Result<()> {
                Ok(())
            }
            async fn remove(&self, _: &str) -> crate::error::Result<bool> {
                Ok(false)
            }
            async fn remove_prefix(&self, _: &str) -> crate::error::Result<u64> {
                Ok(0)
            }
            async fn keys(&self) -> crate::error::Result<Vec<String>> {
                Ok(Vec::new())
            }
            fn stats(&self) -> crate::backend::BackendStats {
                crate::backend::BackendStats::default()
            }
        }

        let cache = Tier2Cache::new(
            Arc::new(SlowBackend),
            Tier2Config {
                op_timeout: Duration::from_millis(10),
                ..Tier2Config::default()
            },
        );

        tokio::time::pause();
        let fut = cache.get("ns:k");
        tokio::pin!(fut);
        let result = fut.await;
        assert!(matches!(result, Err(Error::Timeout { tier: "tier2", .. })));
    }
}
