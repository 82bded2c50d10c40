//! Tier 3 - Durable Cold Cache
//!
//! Last stop in the read path. Holds uncompressed envelopes in a durable
//! backend (filesystem in the default wiring) and absorbs demotions from
//! Tier 2. No capacity budget of its own; the backend's storage is the
//! limit, with expiry sweeps reclaiming dead entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::TierBackend;
use crate::codec::{self, CodecConfig, Envelope};
use crate::error::{Error, Result};

/// Tier 3 configuration
#[derive(Debug, Clone)]
pub struct Tier3Config {
    /// Deadline for each backend operation
    pub op_timeout: Duration,
}

impl Default for Tier3Config {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(crate::DEFAULT_TIER3_TIMEOUT_MS),
        }
    }
}

/// Cold tier over a durable backend
pub struct Tier3Cache {
    backend: Arc<dyn TierBackend>,
    config: Tier3Config,
    codec: CodecConfig,

    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl Tier3Cache {
    pub fn new(backend: Arc<dyn TierBackend>, config: Tier3Config) -> Self {
        Self {
            backend,
            config,
            codec: CodecConfig::uncompressed(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                tier: "tier3",
                millis: self.config.op_timeout.as_millis() as u64,
            }),
        }
    }

    /// Fetch an entry, dropping it if expired
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
            if let Err(e) = self.bounded(self.backend.remove(full_key)).await {
                tracing::debug!(key = full_key, error = %e, "failed to drop expired tier3 entry");
            }
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(envelope))
    }

    /// Store an entry
    pub async fn put(&self, full_key: &str, envelope: &Envelope) -> Result<()> {
        let data = codec::encode(envelope, &self.codec)?;
        self.bounded(self.backend.put(full_key, data)).await
    }

    /// Remove a single entry
    pub async fn remove(&self, full_key: &str) -> Result<bool> {
        self.bounded(self.backend.remove(full_key)).await
    }

    /// Remove every entry under a namespace prefix
    pub async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
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
                None => true,
            };
            if expired {
                self.bounded(self.backend.remove(&key)).await?;
                self.expirations.fetch_add(1, Ordering::Relaxed);
                swept += 1;
            }
        }
        Ok(swept)
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
    use crate::backend::{FileBackend, InMemoryBackend};
    use crate::entry::epoch_secs;
    use serde_json::json;

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
        let cache = Tier3Cache::new(Arc::new(InMemoryBackend::new()), Tier3Config::default());
        cache
            .put("audits:site-1", &envelope(json!({"score": 88}), 600))
            .await
            .unwrap();

        let got = cache.get("audits:site-1").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"score": 88}));
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let cache = Tier3Cache::new(Arc::new(InMemoryBackend::new()), Tier3Config::default());
        let now = epoch_secs();
        cache
            .put(
                "audits:old",
                &Envelope {
                    created_at: now - 100,
                    expires_at: now - 1,
                    value: json!("stale"),
                },
            )
            .await
            .unwrap();

        assert!(cache.get("audits:old").await.unwrap().is_none());
        assert_eq!(cache.expirations(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Tier3Cache::new(
            Arc::new(FileBackend::new(dir.path())),
            Tier3Config::default(),
        );

        cache
            .put("rankings:domain-7", &envelope(json!([1, 2, 3]), 600))
            .await
            .unwrap();
        let got = cache.get("rankings:domain-7").await.unwrap().unwrap();
        assert_eq!(got.value, json!([1, 2, 3]));

        assert!(cache.remove("rankings:domain-7").await.unwrap());
        assert!(cache.get("rankings:domain-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_expired_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Tier3Cache::new(
            Arc::new(FileBackend::new(dir.path())),
            Tier3Config::default(),
        );
        let now = epoch_secs();

        cache
            .put(
                "ns:dead",
                &Envelope {
                    created_at: now - 10,
                    expires_at: now - 1,
                    value: json!(0),
                },
            )
            .await
            .unwrap();
        cache.put("ns:live", &envelope(json!(1), 600)).await.unwrap();

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert!(cache.get("ns:live").await.unwrap().is_some());
    }
}
