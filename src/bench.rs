//! Self-Benchmark
//!
//! Built-in throughput benchmark for deploy-time sanity checks: writes and then
//! reads `n` keys through the manager's hot namespace and reports rates and
//! average latency. This measures the live manager it is given, cold-tier
//! fan-out and all, so it reflects real configuration rather than an ideal
//! Tier-1-only path.

use std::time::Instant;

use serde_json::json;

use crate::error::Result;
use crate::manager::CacheManager;

/// Namespace the benchmark drives
const BENCH_NAMESPACE: &str = "hot";

/// Throughput and latency figures from one benchmark run
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// Operations issued per phase
    pub operations: usize,
    /// Wall time for both phases combined
    pub elapsed: std::time::Duration,
    pub writes_per_sec: f64,
    pub reads_per_sec: f64,
    pub avg_write_latency_ms: f64,
    pub avg_read_latency_ms: f64,
    /// Fraction of reads served from any tier
    pub hit_ratio: f64,
}

impl std::fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ops in {:.2?}: {:.0} writes/s ({:.4}ms avg), {:.0} reads/s ({:.4}ms avg), {:.1}% hit",
            self.operations,
            self.elapsed,
            self.writes_per_sec,
            self.avg_write_latency_ms,
            self.reads_per_sec,
            self.avg_read_latency_ms,
            self.hit_ratio * 100.0
        )
    }
}

/// Run a write phase then a read phase of `n` operations each.
///
/// Requires the manager to carry the default `hot` namespace. Keys are
/// synthetic and cleaned up afterwards, but eviction pressure during the run
/// is real: with `n` above the hot namespace's Tier 1 budget, part of the
/// read phase exercises the miss path too.
pub async fn benchmark(cache: &CacheManager, n: usize) -> Result<BenchmarkReport> {
    // Fails fast if the namespace is missing, like any other caller
    cache.config().policy(BENCH_NAMESPACE)?;

    let payload = json!({
        "keyword": "best seo tools 2024",
        "search_volume": 74_000,
        "difficulty": 61,
        "serp_features": ["featured_snippet", "people_also_ask", "video"],
    });

    let write_start = Instant::now();
    for i in 0..n {
        cache
            .set(
                BENCH_NAMESPACE,
                &format!("bench:{}", i),
                payload.clone(),
                None,
            )
            .await?;
    }
    let write_elapsed = write_start.elapsed();

    let mut hits = 0usize;
    let read_start = Instant::now();
    for i in 0..n {
        if cache
            .get(BENCH_NAMESPACE, &format!("bench:{}", i))
            .await?
            .is_some()
        {
            hits += 1;
        }
    }
    let read_elapsed = read_start.elapsed();

    cache.invalidate_namespace(BENCH_NAMESPACE).await?;

    let write_secs = write_elapsed.as_secs_f64().max(f64::EPSILON);
    let read_secs = read_elapsed.as_secs_f64().max(f64::EPSILON);

    let report = BenchmarkReport {
        operations: n,
        elapsed: write_elapsed + read_elapsed,
        writes_per_sec: n as f64 / write_secs,
        reads_per_sec: n as f64 / read_secs,
        avg_write_latency_ms: write_elapsed.as_secs_f64() * 1000.0 / n.max(1) as f64,
        avg_read_latency_ms: read_elapsed.as_secs_f64() * 1000.0 / n.max(1) as f64,
        hit_ratio: if n == 0 { 0.0 } else { hits as f64 / n as f64 },
    };
    tracing::info!(%report, "cache self-benchmark complete");
    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CacheConfig;

    #[tokio::test]
    async fn test_benchmark_reports_sane_numbers() {
        let cache = CacheManager::new(CacheConfig::default()).unwrap();
        let report = benchmark(&cache, 1_000).await.unwrap();

        assert_eq!(report.operations, 1_000);
        assert!(report.writes_per_sec > 0.0);
        assert!(report.reads_per_sec > 0.0);
        // Everything fits in the default tier1 budget
        assert!((report.hit_ratio - 1.0).abs() < f64::EPSILON);
        // Benchmark cleans up after itself
        assert_eq!(cache.tier1_len("hot").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_benchmark_zero_ops() {
        let cache = CacheManager::new(CacheConfig::default()).unwrap();
        let report = benchmark(&cache, 0).await.unwrap();
        assert_eq!(report.operations, 0);
        assert_eq!(report.hit_ratio, 0.0);
    }
}
