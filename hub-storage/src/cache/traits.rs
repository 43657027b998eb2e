//! Cache backend trait and usage statistics.

use std::time::Duration;

use async_trait::async_trait;
use hub_core::{HubResult, OpContext};

/// Ephemeral key-value store with per-entry TTL.
///
/// Values are opaque bytes; the coordinator decides what is serialized into
/// them. An absent or expired entry is `Ok(None)`, never an error. Backend
/// faults surface as `HubError::Cache`; a done [`OpContext`] surfaces as
/// `Cancelled` / `DeadlineExceeded`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, ctx: &OpContext, key: &str) -> HubResult<Option<Vec<u8>>>;

    async fn set(&self, ctx: &OpContext, key: &str, value: Vec<u8>, ttl: Duration)
        -> HubResult<()>;

    /// Remove an entry. Removing an absent key succeeds.
    async fn delete(&self, ctx: &OpContext, key: &str) -> HubResult<()>;

    /// Stop serving requests; every later call fails with `CacheError::Closed`.
    async fn close(&self) -> HubResult<()>;

    async fn stats(&self) -> HubResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL ran out.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
