//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{CacheError, HubResult, OpContext};
use tokio::time::Instant;

use super::traits::{Cache, CacheStats};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    stats: CacheStats,
}

impl Inner {
    fn drop_entry(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.stats.entry_count = self.stats.entry_count.saturating_sub(1);
        self.stats.memory_bytes = self
            .stats
            .memory_bytes
            .saturating_sub(entry.value.len() as u64);
        Some(entry)
    }
}

/// [`Cache`] kept in a process-local map. Expired entries are dropped when
/// read or by [`MemoryCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<Inner>,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_inner(&self) -> HubResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed.into());
        }
        self.inner.write().map_err(|_| {
            CacheError::Backend {
                reason: "cache lock poisoned".to_string(),
            }
            .into()
        })
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> HubResult<u64> {
        let mut inner = self.open_inner()?;
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.drop_entry(key);
        }
        inner.stats.evictions += expired.len() as u64;
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, ctx: &OpContext, key: &str) -> HubResult<Option<Vec<u8>>> {
        ctx.check()?;
        let mut inner = self.open_inner()?;
        let now = Instant::now();
        let state = inner
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        let live = match state {
            Some(Some(value)) => Some(value),
            Some(None) => {
                inner.drop_entry(key);
                inner.stats.evictions += 1;
                None
            }
            None => None,
        };
        match live {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        Ok(live)
    }

    async fn set(
        &self,
        ctx: &OpContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> HubResult<()> {
        ctx.check()?;
        let mut inner = self.open_inner()?;
        inner.drop_entry(key);
        inner.stats.entry_count += 1;
        inner.stats.memory_bytes += value.len() as u64;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, key: &str) -> HubResult<()> {
        ctx.check()?;
        self.open_inner()?.drop_entry(key);
        Ok(())
    }

    async fn close(&self) -> HubResult<()> {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut inner) = self.inner.write() {
            inner.entries.clear();
            inner.stats.entry_count = 0;
            inner.stats.memory_bytes = 0;
        }
        Ok(())
    }

    async fn stats(&self) -> HubResult<CacheStats> {
        Ok(self
            .inner
            .read()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::HubError;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        let ctx = OpContext::background();
        cache
            .set(&ctx, "user:u1", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get(&ctx, "user:u1").await.unwrap(),
            Some(b"payload".to_vec())
        );
        cache.delete(&ctx, "user:u1").await.unwrap();
        assert_eq!(cache.get(&ctx, "user:u1").await.unwrap(), None);
        // Deleting again is fine.
        cache.delete(&ctx, "user:u1").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        let ctx = OpContext::background();
        cache
            .set(&ctx, "contact:list", b"[]".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&ctx, "contact:list").await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        let ctx = OpContext::background();
        cache
            .set(&ctx, "short", vec![1], Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set(&ctx, "long", vec![2], Duration::from_secs(100))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get(&ctx, "long").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = MemoryCache::new();
        let ctx = OpContext::background();
        let _ = cache.get(&ctx, "missing").await;
        cache
            .set(&ctx, "k", vec![0; 10], Duration::from_secs(60))
            .await
            .unwrap();
        let _ = cache.get(&ctx, "k").await;
        let _ = cache.get(&ctx, "k").await;

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, 10);
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_calls() {
        let cache = MemoryCache::new();
        let ctx = OpContext::background();
        cache.close().await.unwrap();
        let err = cache.get(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, HubError::Cache(CacheError::Closed)));
        assert!(cache
            .set(&ctx, "k", vec![], Duration::from_secs(1))
            .await
            .is_err());
    }
}
