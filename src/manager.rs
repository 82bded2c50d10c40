//! Cache Manager
//!
//! Orchestrates the tier chain. A `get` walks Tier 1 -> Tier 2 -> Tier 3 and
//! promotes whatever it finds into every warmer tier on the way back; a `set`
//! writes Tier 1 and fans out to the cold tiers the namespace policy names.
//! Tier 1 eviction victims are demoted into Tier 2, and Tier 2 budget
//! overflow demotes into Tier 3, so capacity pressure trades latency for
//! recomputation instead of discarding work outright.
//!
//! # Failure posture
//!
//! The cache is a best-effort accelerator. A dead or slow backend turns into
//! misses and skipped writes, logged and counted but never surfaced. The one
//! exception is [`Error::UnknownNamespace`]: a namespace missing from the
//! policy table is a misconfiguration and fails loudly at call time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::backend::{InMemoryBackend, TierBackend};
use crate::codec::{CodecConfig, Envelope};
use crate::entry::{CacheEntry, CacheKey, CacheTier, EntryMetadata};
use crate::error::{Error, Result};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::policy::{CacheConfig, NamespacePolicy};
use crate::tier1::{Tier1Cache, Tier1Config};
use crate::tier2::{Tier2Cache, Tier2Config};
use crate::tier3::{Tier3Cache, Tier3Config};

/// Multi-tier cache manager
pub struct CacheManager {
    config: CacheConfig,
    /// One Tier 1 store per namespace, each with its own budget
    tier1: HashMap<String, Tier1Cache>,
    tier2: Option<Tier2Cache>,
    tier3: Option<Tier3Cache>,
    metrics: CacheMetrics,
}

impl CacheManager {
    /// Build a manager with in-memory cold-tier backends.
    ///
    /// Production wiring supplies real backends through
    /// [`CacheManager::with_backends`]; this constructor is for tests and
    /// single-process deployments.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let needs_tier2 = config.namespaces.values().any(|p| p.use_tier2);
        let needs_tier3 = config.namespaces.values().any(|p| p.use_tier3);
        Self::with_backends(
            config,
            needs_tier2.then(|| Arc::new(InMemoryBackend::new()) as Arc<dyn TierBackend>),
            needs_tier3.then(|| Arc::new(InMemoryBackend::new()) as Arc<dyn TierBackend>),
        )
    }

    /// Build a manager over explicit cold-tier backends
    pub fn with_backends(
        config: CacheConfig,
        tier2_backend: Option<Arc<dyn TierBackend>>,
        tier3_backend: Option<Arc<dyn TierBackend>>,
    ) -> Result<Self> {
        config.validate()?;

        if tier2_backend.is_none() && config.namespaces.values().any(|p| p.use_tier2) {
            return Err(Error::Config(
                "a namespace enables tier2 but no tier2 backend was supplied".into(),
            ));
        }
        if tier3_backend.is_none() && config.namespaces.values().any(|p| p.use_tier3) {
            return Err(Error::Config(
                "a namespace enables tier3 but no tier3 backend was supplied".into(),
            ));
        }

        let tier1 = config
            .namespaces
            .iter()
            .map(|(name, policy)| {
                let store = Tier1Cache::with_config(Tier1Config {
                    max_items: policy.max_tier1_items,
                    max_bytes: policy.max_tier1_bytes,
                    shard_count: config.shard_count,
                });
                (name.clone(), store)
            })
            .collect();

        let tier2 = tier2_backend.map(|backend| {
            Tier2Cache::new(
                backend,
                Tier2Config {
                    op_timeout: Duration::from_millis(config.tier2_timeout_ms),
                    max_bytes: config.tier2_max_bytes,
                    codec: CodecConfig {
                        min_compress_bytes: config.min_compress_bytes,
                        ..CodecConfig::default()
                    },
                },
            )
        });
        let tier3 = tier3_backend.map(|backend| {
            Tier3Cache::new(
                backend,
                Tier3Config {
                    op_timeout: Duration::from_millis(config.tier3_timeout_ms),
                },
            )
        });

        Ok(Self {
            config,
            tier1,
            tier2,
            tier3,
            metrics: CacheMetrics::new(),
        })
    }

    fn policy(&self, namespace: &str) -> Result<&NamespacePolicy> {
        self.config.policy(namespace)
    }

    fn tier1_store(&self, namespace: &str) -> Result<&Tier1Cache> {
        self.tier1
            .get(namespace)
            .ok_or_else(|| Error::UnknownNamespace {
                namespace: namespace.to_string(),
            })
    }

    /// Look up a value, walking the tier chain coldward on misses.
    ///
    /// A value found in a cold tier is promoted into every warmer tier
    /// before it is returned. Only an unknown namespace is an error; a total
    /// miss is `Ok(None)`.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Arc<Value>>> {
        let policy = self.policy(namespace)?;
        let store = self.tier1_store(namespace)?;
        let cache_key = CacheKey::new(namespace, key);

        let start = Instant::now();
        let tier1_result = store.get(&cache_key);
        self.metrics
            .record_read_latency(CacheTier::Tier1, start.elapsed());

        if let Some(entry) = tier1_result {
            self.metrics.record_hit(CacheTier::Tier1);
            return Ok(Some(Arc::clone(entry.value())));
        }
        self.metrics.record_miss(CacheTier::Tier1);

        let full_key = cache_key.full();

        if policy.use_tier2 {
            if let Some(tier2) = &self.tier2 {
                let start = Instant::now();
                let found = tier2.get(&full_key).await;
                self.metrics
                    .record_read_latency(CacheTier::Tier2, start.elapsed());

                match found {
                    Ok(Some(envelope)) => {
                        self.metrics.record_hit(CacheTier::Tier2);
                        let value = Arc::new(envelope.value.clone());
                        self.promote_to_tier1(policy, store, &cache_key, &envelope)
                            .await;
                        return Ok(Some(value));
                    }
                    Ok(None) => self.metrics.record_miss(CacheTier::Tier2),
                    Err(e) => self.degrade(CacheTier::Tier2, "get", &full_key, e),
                }
            }
        }

        if policy.use_tier3 {
            if let Some(tier3) = &self.tier3 {
                let start = Instant::now();
                let found = tier3.get(&full_key).await;
                self.metrics
                    .record_read_latency(CacheTier::Tier3, start.elapsed());

                match found {
                    Ok(Some(envelope)) => {
                        self.metrics.record_hit(CacheTier::Tier3);
                        let value = Arc::new(envelope.value.clone());

                        // Warmer tiers on the path both get a copy
                        if policy.use_tier2 {
                            if let Some(tier2) = &self.tier2 {
                                match tier2.put(&full_key, &envelope).await {
                                    Ok(displaced) => {
                                        self.metrics.record_promotion();
                                        self.demote_to_tier3(displaced).await;
                                    }
                                    Err(e) => {
                                        self.degrade(CacheTier::Tier2, "promote", &full_key, e)
                                    }
                                }
                            }
                        }
                        self.promote_to_tier1(policy, store, &cache_key, &envelope)
                            .await;
                        return Ok(Some(value));
                    }
                    Ok(None) => self.metrics.record_miss(CacheTier::Tier3),
                    Err(e) => self.degrade(CacheTier::Tier3, "get", &full_key, e),
                }
            }
        }

        Ok(None)
    }

    /// Write a value through the tier chain per namespace policy.
    ///
    /// `ttl` falls back to the namespace default. The write always lands in
    /// Tier 1; fan-out to Tier 2/3 follows the policy and degrades silently
    /// if a backend is down.
    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let policy = self.policy(namespace)?;
        let store = self.tier1_store(namespace)?;
        let ttl = ttl.unwrap_or_else(|| policy.ttl());

        let cache_key = CacheKey::new(namespace, key);
        let full_key = cache_key.full();
        let entry = CacheEntry::new(value, ttl);
        let envelope = envelope_of(&entry);

        self.metrics.record_set();

        let start = Instant::now();
        let victims = store.put(cache_key, entry);
        self.metrics
            .record_write_latency(CacheTier::Tier1, start.elapsed());
        self.demote_tier1_victims(policy, victims).await;

        if policy.use_tier2 {
            if let Some(tier2) = &self.tier2 {
                let start = Instant::now();
                let result = tier2.put(&full_key, &envelope).await;
                self.metrics
                    .record_write_latency(CacheTier::Tier2, start.elapsed());
                match result {
                    Ok(displaced) => self.demote_to_tier3(displaced).await,
                    Err(e) => self.degrade(CacheTier::Tier2, "put", &full_key, e),
                }
            }
        }

        if policy.use_tier3 {
            if let Some(tier3) = &self.tier3 {
                let start = Instant::now();
                let result = tier3.put(&full_key, &envelope).await;
                self.metrics
                    .record_write_latency(CacheTier::Tier3, start.elapsed());
                if let Err(e) = result {
                    self.degrade(CacheTier::Tier3, "put", &full_key, e);
                }
            }
        }

        Ok(())
    }

    /// Remove a key from every tier.
    ///
    /// All configured tiers are cleared regardless of the namespace's write
    /// policy; demotion can park an entry in a tier the policy never writes.
    pub async fn invalidate(&self, namespace: &str, key: &str) -> Result<()> {
        let store = self.tier1_store(namespace)?;
        let cache_key = CacheKey::new(namespace, key);
        let full_key = cache_key.full();

        self.metrics.record_invalidation();
        store.remove(&cache_key);

        if let Some(tier2) = &self.tier2 {
            if let Err(e) = tier2.remove(&full_key).await {
                self.degrade(CacheTier::Tier2, "invalidate", &full_key, e);
            }
        }
        if let Some(tier3) = &self.tier3 {
            if let Err(e) = tier3.remove(&full_key).await {
                self.degrade(CacheTier::Tier3, "invalidate", &full_key, e);
            }
        }
        Ok(())
    }

    /// Remove every key in a namespace whose logical key starts with
    /// `key_prefix`, from every tier
    pub async fn invalidate_prefix(&self, namespace: &str, key_prefix: &str) -> Result<()> {
        let store = self.tier1_store(namespace)?;
        let full_prefix = format!("{}{}", CacheKey::namespace_prefix(namespace), key_prefix);

        self.metrics.record_invalidation();
        store.remove_matching(key_prefix);

        if let Some(tier2) = &self.tier2 {
            if let Err(e) = tier2.remove_prefix(&full_prefix).await {
                self.degrade(CacheTier::Tier2, "invalidate_prefix", &full_prefix, e);
            }
        }
        if let Some(tier3) = &self.tier3 {
            if let Err(e) = tier3.remove_prefix(&full_prefix).await {
                self.degrade(CacheTier::Tier3, "invalidate_prefix", &full_prefix, e);
            }
        }
        Ok(())
    }

    /// Remove every key in a namespace from every tier
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<()> {
        let store = self.tier1_store(namespace)?;
        let prefix = CacheKey::namespace_prefix(namespace);

        self.metrics.record_invalidation();
        store.clear();

        if let Some(tier2) = &self.tier2 {
            if let Err(e) = tier2.remove_prefix(&prefix).await {
                self.degrade(CacheTier::Tier2, "invalidate_namespace", &prefix, e);
            }
        }
        if let Some(tier3) = &self.tier3 {
            if let Err(e) = tier3.remove_prefix(&prefix).await {
                self.degrade(CacheTier::Tier3, "invalidate_namespace", &prefix, e);
            }
        }
        Ok(())
    }

    /// Eagerly drop expired entries in every tier, returning how many went.
    ///
    /// Expiry is otherwise lazy; this is for a periodic maintenance task.
    pub async fn sweep_expired(&self) -> u64 {
        let mut swept = 0u64;
        for store in self.tier1.values() {
            swept += store.sweep_expired() as u64;
        }
        if let Some(tier2) = &self.tier2 {
            match tier2.sweep_expired().await {
                Ok(n) => swept += n,
                Err(e) => self.degrade(CacheTier::Tier2, "sweep", "*", e),
            }
        }
        if let Some(tier3) = &self.tier3 {
            match tier3.sweep_expired().await {
                Ok(n) => swept += n,
                Err(e) => self.degrade(CacheTier::Tier3, "sweep", "*", e),
            }
        }
        swept
    }

    /// Point-in-time metrics for a status endpoint.
    ///
    /// Eviction and expiration totals live in the tier stores, which observe
    /// capacity eviction and lazy expiry directly; they are summed into the
    /// snapshot here.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snap = self.metrics.snapshot();
        snap.evictions = self.tier1.values().map(|s| s.evictions()).sum();
        snap.expirations = self.tier1.values().map(|s| s.expirations()).sum::<u64>()
            + self.tier2.as_ref().map_or(0, |t| t.expirations())
            + self.tier3.as_ref().map_or(0, |t| t.expirations());
        snap
    }

    /// Zero every metrics counter, including the tier stores' own
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        for store in self.tier1.values() {
            store.reset_counters();
        }
        if let Some(tier2) = &self.tier2 {
            tier2.reset_counters();
        }
        if let Some(tier3) = &self.tier3 {
            tier3.reset_counters();
        }
    }

    /// The configuration this manager was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resident entry count in a namespace's Tier 1 store
    pub fn tier1_len(&self, namespace: &str) -> Result<usize> {
        Ok(self.tier1_store(namespace)?.len())
    }

    /// Whether a key is resident in Tier 1 (no recency stamp, no promotion)
    pub fn tier1_contains(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .tier1_store(namespace)?
            .contains(&CacheKey::new(namespace, key)))
    }

    /// Copy a cold-tier envelope into Tier 1 with its remaining TTL intact
    async fn promote_to_tier1(
        &self,
        policy: &NamespacePolicy,
        store: &Tier1Cache,
        key: &CacheKey,
        envelope: &Envelope,
    ) {
        let value = Arc::new(envelope.value.clone());
        let size = crate::entry::approx_value_size(&value);
        let metadata = EntryMetadata::from_timestamps(
            size,
            envelope.created_at,
            envelope.expires_at,
            CacheTier::Tier1,
        );
        let entry = CacheEntry::with_metadata(value, metadata);

        self.metrics.record_promotion();
        let victims = store.put(key.clone(), entry);
        self.demote_tier1_victims(policy, victims).await;
    }

    /// Push Tier 1 eviction victims into Tier 2 if the policy allows
    async fn demote_tier1_victims(
        &self,
        policy: &NamespacePolicy,
        victims: Vec<(CacheKey, CacheEntry)>,
    ) {
        if victims.is_empty() || !policy.demote_on_evict || !policy.use_tier2 {
            return;
        }
        let Some(tier2) = &self.tier2 else { return };

        for (key, entry) in victims {
            let full_key = key.full();
            let envelope = envelope_of(&entry);
            match tier2.put(&full_key, &envelope).await {
                Ok(displaced) => {
                    self.metrics.record_demotion_tier1_to_tier2();
                    self.demote_to_tier3(displaced).await;
                }
                Err(e) => self.degrade(CacheTier::Tier2, "demote", &full_key, e),
            }
        }
    }

    /// Park entries the Tier 2 budget pushed out in Tier 3
    async fn demote_to_tier3(&self, displaced: Vec<(String, Envelope)>) {
        if displaced.is_empty() {
            return;
        }
        let Some(tier3) = &self.tier3 else {
            tracing::debug!(
                count = displaced.len(),
                "tier2 overflow discarded, no tier3 configured"
            );
            return;
        };
        for (full_key, envelope) in displaced {
            match tier3.put(&full_key, &envelope).await {
                Ok(()) => self.metrics.record_demotion_tier2_to_tier3(),
                Err(e) => self.degrade(CacheTier::Tier3, "demote", &full_key, e),
            }
        }
    }

    /// Log and count a backend failure that was absorbed into a miss/no-op
    fn degrade(&self, tier: CacheTier, op: &str, key: &str, error: Error) {
        self.metrics.record_degraded_op();
        tracing::warn!(%tier, op, key, error = %error, "cache backend degraded, continuing without it");
    }
}

/// Cold-tier envelope for a Tier 1 entry
fn envelope_of(entry: &CacheEntry) -> Envelope {
    Envelope {
        created_at: entry.metadata.created_at(),
        expires_at: entry.metadata.expires_at(),
        value: (**entry.value()).clone(),
    }
}

// =============================================================================
// Tests
// =============================================================================
