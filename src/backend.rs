//! Tier Backends
//!
//! Storage port for the cold tiers. Tier 2 and Tier 3 speak to their stores
//! through [`TierBackend`], a byte-oriented async trait, so a networked
//! key-value service, the local filesystem, or an in-process map all plug in
//! the same way.
//!
//! Backends store opaque envelope bytes keyed by full key strings
//! (`"{namespace}:{key}"`). They know nothing about expiry or compression;
//! that lives in the tier layers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// Byte-oriented storage port for Tier 2 and Tier 3
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Fetch the bytes stored under `full_key`, if any
    async fn get(&self, full_key: &str) -> Result<Option<Bytes>>;

    /// Store `data` under `full_key`, replacing any previous value
    async fn put(&self, full_key: &str, data: Bytes) -> Result<()>;

    /// Remove `full_key`; returns whether it was present
    async fn remove(&self, full_key: &str) -> Result<bool>;

    /// Remove every key starting with `prefix`; returns how many went
    async fn remove_prefix(&self, prefix: &str) -> Result<u64>;

    /// List all stored keys. Used by expiry sweeps; may be expensive.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Backend statistics
    fn stats(&self) -> BackendStats;
}

/// Backend operation counters
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Objects currently stored
    pub object_count: u64,
    /// Bytes currently stored
    pub total_bytes: u64,
    /// Read operations served
    pub reads: u64,
    /// Write operations served
    pub writes: u64,
    /// Remove operations served
    pub removes: u64,
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-process backend on a concurrent map.
///
/// The default stand-in for a networked Tier 2 store in tests and the
/// self-benchmark. DashMap keeps unrelated keys contention-free.
pub struct InMemoryBackend {
    storage: DashMap<String, Bytes>,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            storage: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierBackend for InMemoryBackend {
    async fn get(&self, full_key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(full_key).map(|v| v.clone()))
    }

    async fn put(&self, full_key: &str, data: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let new_len = data.len() as u64;
        match self.storage.insert(full_key.to_string(), data) {
            Some(old) => {
                let old_len = old.len() as u64;
                if new_len >= old_len {
                    self.total_bytes.fetch_add(new_len - old_len, Ordering::Relaxed);
                } else {
                    self.total_bytes.fetch_sub(old_len - new_len, Ordering::Relaxed);
                }
            }
            None => {
                self.total_bytes.fetch_add(new_len, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn remove(&self, full_key: &str) -> Result<bool> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        match self.storage.remove(full_key) {
            Some((_, old)) => {
                self.total_bytes
                    .fetch_sub(old.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0u64;
        let mut freed = 0u64;
        self.storage.retain(|k, v| {
            if k.starts_with(prefix) {
                removed += 1;
                freed += v.len() as u64;
                false
            } else {
                true
            }
        });
        self.removes.fetch_add(removed, Ordering::Relaxed);
        self.total_bytes.fetch_sub(freed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.storage.iter().map(|e| e.key().clone()).collect())
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            object_count: self.storage.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// File Backend
// =============================================================================

/// Durable backend writing one file per key under a root directory.
///
/// Full keys are not filesystem-safe, so each record is stored under a hash
/// of its key with the key echoed in a length-prefixed header, letting
/// `keys()` and `remove_prefix()` recover the original names.
pub struct FileBackend {
    root: PathBuf,
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removes: AtomicU64::new(0),
        }
    }

    fn path_for(&self, full_key: &str) -> PathBuf {
        self.root
            .join(format!(
                "{:016x}.cache",
                crate::entry::fx_hash(full_key.as_bytes())
            ))
    }

    fn frame(full_key: &str, data: &[u8]) -> Vec<u8> {
        let key_bytes = full_key.as_bytes();
        let mut out = Vec::with_capacity(4 + key_bytes.len() + data.len());
        out.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(key_bytes);
        out.extend_from_slice(data);
        out
    }

    fn unframe(raw: &[u8]) -> Result<(String, Bytes)> {
        if raw.len() < 4 {
            return Err(Error::CorruptPayload("truncated cache file".into()));
        }
        let key_len = u32::from_le_bytes(raw[..4].try_into().expect("sized slice")) as usize;
        if raw.len() < 4 + key_len {
            return Err(Error::CorruptPayload("truncated cache file header".into()));
        }
        let key = std::str::from_utf8(&raw[4..4 + key_len])
            .map_err(|e| Error::CorruptPayload(format!("non-utf8 key in cache file: {}", e)))?
            .to_string();
        Ok((key, Bytes::copy_from_slice(&raw[4 + key_len..])))
    }

    async fn read_frame(&self, path: &PathBuf) -> Result<Option<(String, Bytes)>> {
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(Self::unframe(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TierBackend for FileBackend {
    async fn get(&self, full_key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.read_frame(&self.path_for(full_key)).await? {
            // Hash collision check: the stored key must match
            Some((stored_key, data)) if stored_key == full_key => Ok(Some(data)),
            _ => Ok(None),
        }
    }

    async fn put(&self, full_key: &str, data: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        tokio::fs::create_dir_all(&self.root).await?;
        let framed = Self::frame(full_key, &data);

        // Write-then-rename so a crashed write never leaves a torn file
        let path = self.path_for(full_key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &framed).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, full_key: &str) -> Result<bool> {
        self.removes.fetch_add(1, Ordering::Relaxed);
        match tokio::fs::remove_file(self.path_for(full_key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0u64;
        for key in self.keys().await? {
            if key.starts_with(prefix) && self.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().map(|e| e == "cache") != Some(true) {
                continue;
            }
            if let Some((key, _)) = self.read_frame(&path).await? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            object_count: 0,
            total_bytes: 0,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Failing Backend
// =============================================================================

/// Fault-injection backend: every operation fails while tripped.
///
/// Exercises the degraded paths — backend failures must surface to callers
/// as misses and skipped writes, never as errors.
pub struct FailingBackend {
    inner: InMemoryBackend,
    tripped: AtomicBool,
    tier: &'static str,
}

impl FailingBackend {
    pub fn new(tier: &'static str) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            tripped: AtomicBool::new(true),
            tier,
        }
    }

    /// Start failing every operation
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    /// Resume normal service
    pub fn restore(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.tripped.load(Ordering::SeqCst) {
            Err(Error::TierUnavailable {
                tier: self.tier,
                reason: "injected failure".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TierBackend for FailingBackend {
    async fn get(&self, full_key: &str) -> Result<Option<Bytes>> {
        self.check()?;
        self.inner.get(full_key).await
    }

    async fn put(&self, full_key: &str, data: Bytes) -> Result<()> {
        self.check()?;
        self.inner.put(full_key, data).await
    }

    async fn remove(&self, full_key: &str) -> Result<bool> {
        self.check()?;
        self.inner.remove(full_key).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        self.check()?;
        self.inner.remove_prefix(prefix).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys().await
    }

    fn stats(&self) -> BackendStats {
        self.inner.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_put_get_remove() {
        let backend = InMemoryBackend::new();

        backend.put("serp:query-1", Bytes::from("payload")).await.unwrap();
        assert_eq!(
            backend.get("serp:query-1").await.unwrap(),
            Some(Bytes::from("payload"))
        );
        assert!(backend.get("serp:query-2").await.unwrap().is_none());

        assert!(backend.remove("serp:query-1").await.unwrap());
        assert!(!backend.remove("serp:query-1").await.unwrap());
        assert!(backend.get("serp:query-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_remove_prefix() {
        let backend = InMemoryBackend::new();
        backend.put("serp:a", Bytes::from("1")).await.unwrap();
        backend.put("serp:b", Bytes::from("2")).await.unwrap();
        backend.put("rankings:a", Bytes::from("3")).await.unwrap();

        let removed = backend.remove_prefix("serp:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(backend.get("serp:a").await.unwrap().is_none());
        assert!(backend.get("rankings:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_in_memory_stats_track_bytes() {
        let backend = InMemoryBackend::new();
        backend.put("k", Bytes::from(vec![0u8; 100])).await.unwrap();
        assert_eq!(backend.stats().total_bytes, 100);

        backend.put("k", Bytes::from(vec![0u8; 40])).await.unwrap();
        assert_eq!(backend.stats().total_bytes, 40);
        assert_eq!(backend.stats().object_count, 1);

        backend.remove("k").await.unwrap();
        assert_eq!(backend.stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());

        backend
            .put("audits:site-9", Bytes::from("envelope bytes"))
            .await
            .unwrap();
        assert_eq!(
            backend.get("audits:site-9").await.unwrap(),
            Some(Bytes::from("envelope bytes"))
        );

        let keys = backend.keys().await.unwrap();
        assert_eq!(keys, vec!["audits:site-9".to_string()]);

        assert!(backend.remove("audits:site-9").await.unwrap());
        assert!(backend.get("audits:site-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backend_remove_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());

        backend.put("audits:a", Bytes::from("1")).await.unwrap();
        backend.put("audits:b", Bytes::from("2")).await.unwrap();
        backend.put("serp:a", Bytes::from("3")).await.unwrap();

        assert_eq!(backend.remove_prefix("audits:").await.unwrap(), 2);
        assert!(backend.get("serp:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_backend_missing_dir_is_empty() {
        let backend = FileBackend::new("/nonexistent/cache/root/for-test");
        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_backend_trips_and_restores() {
        let backend = FailingBackend::new("tier2");

        assert!(matches!(
            backend.get("k").await,
            Err(Error::TierUnavailable { tier: "tier2", .. })
        ));
        assert!(backend.put("k", Bytes::from("v")).await.is_err());

        backend.restore();
        backend.put("k", Bytes::from("v")).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from("v")));

        backend.trip();
        assert!(backend.get("k").await.is_err());
    }
}
