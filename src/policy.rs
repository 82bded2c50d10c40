//! Namespace Policies and Configuration
//!
//! Every cache key lives in a namespace, and the namespace decides its TTL,
//! its Tier 1 budget, and which cold tiers its writes fan out to. The policy
//! table is fixed at construction; asking the manager about a namespace it
//! was not configured with is a programmer error and fails fast.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-namespace cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacePolicy {
    /// Default TTL in seconds for entries in this namespace
    pub ttl_secs: u64,
    /// Tier 1 item budget
    #[serde(default = "default_tier1_items")]
    pub max_tier1_items: usize,
    /// Tier 1 byte budget
    #[serde(default = "default_tier1_bytes")]
    pub max_tier1_bytes: u64,
    /// Fan writes out to Tier 2
    #[serde(default)]
    pub use_tier2: bool,
    /// Fan writes out to Tier 3
    #[serde(default)]
    pub use_tier3: bool,
    /// Demote Tier 1 eviction victims to Tier 2 instead of discarding them
    #[serde(default = "default_true")]
    pub demote_on_evict: bool,
}

fn default_tier1_items() -> usize {
    crate::DEFAULT_TIER1_MAX_ITEMS
}

fn default_tier1_bytes() -> u64 {
    crate::DEFAULT_TIER1_MAX_BYTES
}

fn default_true() -> bool {
    true
}

impl NamespacePolicy {
    /// Short-TTL policy for data refetched constantly (Tier 1 only)
    pub fn hot() -> Self {
        Self {
            ttl_secs: 300,
            max_tier1_items: crate::DEFAULT_TIER1_MAX_ITEMS,
            max_tier1_bytes: crate::DEFAULT_TIER1_MAX_BYTES,
            use_tier2: false,
            use_tier3: false,
            demote_on_evict: false,
        }
    }

    /// Hour-scale policy backed by the networked tier
    pub fn warm() -> Self {
        Self {
            ttl_secs: 3_600,
            max_tier1_items: crate::DEFAULT_TIER1_MAX_ITEMS,
            max_tier1_bytes: crate::DEFAULT_TIER1_MAX_BYTES,
            use_tier2: true,
            use_tier3: false,
            demote_on_evict: true,
        }
    }

    /// Day-scale policy for expensive, rarely-touched results (all tiers)
    pub fn cold() -> Self {
        Self {
            ttl_secs: 86_400,
            max_tier1_items: crate::DEFAULT_TIER1_MAX_ITEMS,
            max_tier1_bytes: crate::DEFAULT_TIER1_MAX_BYTES,
            use_tier2: true,
            use_tier3: true,
            demote_on_evict: true,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn validate(&self, namespace: &str) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::Config(format!(
                "namespace '{}' has zero ttl_secs",
                namespace
            )));
        }
        if self.max_tier1_items == 0 || self.max_tier1_bytes == 0 {
            return Err(Error::Config(format!(
                "namespace '{}' has a zero tier1 budget",
                namespace
            )));
        }
        if self.use_tier3 && !self.use_tier2 {
            return Err(Error::Config(format!(
                "namespace '{}' enables tier3 without tier2",
                namespace
            )));
        }
        Ok(())
    }
}

/// Full cache configuration: the namespace policy table plus tier tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace policy table
    pub namespaces: HashMap<String, NamespacePolicy>,
    /// Shard count for each namespace's Tier 1 store (power of two)
    pub shard_count: usize,
    /// Deadline for Tier 2 backend calls, in milliseconds
    pub tier2_timeout_ms: u64,
    /// Deadline for Tier 3 backend calls, in milliseconds
    pub tier3_timeout_ms: u64,
    /// Optional Tier 2 byte budget; overflow demotes to Tier 3
    pub tier2_max_bytes: Option<u64>,
    /// Payloads below this size are stored uncompressed in Tier 2
    pub min_compress_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert("hot".to_string(), NamespacePolicy::hot());
        namespaces.insert("warm".to_string(), NamespacePolicy::warm());
        namespaces.insert("cold".to_string(), NamespacePolicy::cold());
        Self {
            namespaces,
            shard_count: crate::SHARD_COUNT,
            tier2_timeout_ms: crate::DEFAULT_TIER2_TIMEOUT_MS,
            tier3_timeout_ms: crate::DEFAULT_TIER3_TIMEOUT_MS,
            tier2_max_bytes: None,
            min_compress_bytes: crate::MIN_COMPRESS_BYTES,
        }
    }
}

impl CacheConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a namespace policy, failing fast on unknown namespaces
    pub fn policy(&self, namespace: &str) -> Result<&NamespacePolicy> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| Error::UnknownNamespace {
                namespace: namespace.to_string(),
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespaces.is_empty() {
            return Err(Error::Config("no namespaces configured".into()));
        }
        if !self.shard_count.is_power_of_two() {
            return Err(Error::Config(format!(
                "shard_count {} is not a power of two",
                self.shard_count
            )));
        }
        if self.tier2_timeout_ms == 0 || self.tier3_timeout_ms == 0 {
            return Err(Error::Config("tier timeouts must be non-zero".into()));
        }
        for (name, policy) in &self.namespaces {
            policy.validate(name)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
