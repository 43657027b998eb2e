//! LMDB-backed TTL cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! cache that survives process restarts. Entries keep their expiry inline:
//!
//! `[expires_at: 8 bytes, i64 millis LE][payload]`
//!
//! Expired entries read as absent and are removed lazily, or eagerly by
//! [`LmdbCache::purge_expired`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use hub_core::{CacheError, HubResult, OpContext};

use super::traits::{Cache, CacheStats};

const HEADER_LEN: usize = 8;

fn backend(e: heed::Error) -> CacheError {
    CacheError::Backend {
        reason: e.to_string(),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Split a stored value into its expiry and payload.
fn split_entry(bytes: &[u8]) -> Option<(i64, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let expires_at = i64::from_le_bytes(header.try_into().ok()?);
    Some((expires_at, payload))
}

/// [`Cache`] persisted in an LMDB environment.
pub struct LmdbCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: RwLock<CacheStats>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LmdbCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCache")
            .field("path", &self.env.path())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LmdbCache {
    /// Open (or create) a cache under `path`, sized `max_size_mb`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> HubResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| CacheError::Backend {
            reason: format!("create {}: {}", path.as_ref().display(), e),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(backend)?;

        let mut wtxn = env.write_txn().map_err(backend)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("cache"))
            .map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        let entry_count = {
            let rtxn = env.read_txn().map_err(backend)?;
            db.len(&rtxn).map_err(backend)?
        };

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats {
                entry_count,
                ..CacheStats::default()
            }),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Remove `key` if its entry has expired as of `now`. Returns whether
    /// anything was removed.
    fn evict_if_expired(&self, key: &str, now: i64) -> Result<bool, CacheError> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let size = match self.db.get(&wtxn, key.as_bytes()).map_err(backend)? {
            Some(bytes) => match split_entry(bytes) {
                Some((expires_at, _)) if expires_at > now => return Ok(false),
                Some((_, payload)) => payload.len(),
                None => 0,
            },
            None => return Ok(false),
        };
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        self.record(|s| {
            s.entry_count = s.entry_count.saturating_sub(1);
            s.memory_bytes = s.memory_bytes.saturating_sub(size as u64);
            s.evictions += 1;
        });
        Ok(true)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> HubResult<u64> {
        self.ensure_open()?;
        let now = now_millis();
        let expired: Vec<(Vec<u8>, usize)> = {
            let rtxn = self.env.read_txn().map_err(backend)?;
            let mut expired = Vec::new();
            for entry in self.db.iter(&rtxn).map_err(backend)? {
                let (key, bytes) = entry.map_err(backend)?;
                match split_entry(bytes) {
                    Some((expires_at, _)) if expires_at > now => {}
                    Some((_, payload)) => expired.push((key.to_vec(), payload.len())),
                    None => expired.push((key.to_vec(), 0)),
                }
            }
            expired
        };

        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let mut removed = 0u64;
        let mut freed = 0u64;
        for (key, size) in &expired {
            if self.db.delete(&mut wtxn, key).map_err(backend)? {
                removed += 1;
                freed += *size as u64;
            }
        }
        wtxn.commit().map_err(backend)?;

        self.record(|s| {
            s.entry_count = s.entry_count.saturating_sub(removed);
            s.memory_bytes = s.memory_bytes.saturating_sub(freed);
            s.evictions += removed;
        });
        Ok(removed)
    }
}

#[async_trait]
impl Cache for LmdbCache {
    async fn get(&self, ctx: &OpContext, key: &str) -> HubResult<Option<Vec<u8>>> {
        ctx.check()?;
        self.ensure_open()?;
        let now = now_millis();

        let (live, expired) = {
            let rtxn = self.env.read_txn().map_err(backend)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(backend)? {
                Some(bytes) => match split_entry(bytes) {
                    Some((expires_at, payload)) if expires_at > now => {
                        (Some(payload.to_vec()), false)
                    }
                    _ => (None, true),
                },
                None => (None, false),
            }
        };

        if expired {
            self.evict_if_expired(key, now)?;
        }
        self.record(|s| match live {
            Some(_) => s.hits += 1,
            None => s.misses += 1,
        });
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
        self.ensure_open()?;

        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_millis);
        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let previous = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(backend)?
            .map(|bytes| bytes.len().saturating_sub(HEADER_LEN));
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        self.record(|s| {
            if let Some(old) = previous {
                s.memory_bytes = s.memory_bytes.saturating_sub(old as u64);
            } else {
                s.entry_count += 1;
            }
            s.memory_bytes += value.len() as u64;
        });
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, key: &str) -> HubResult<()> {
        ctx.check()?;
        self.ensure_open()?;

        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let size = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(backend)?
            .map(|bytes| bytes.len().saturating_sub(HEADER_LEN));
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        if deleted {
            self.record(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(size.unwrap_or(0) as u64);
            });
        }
        Ok(())
    }

    async fn close(&self) -> HubResult<()> {
        self.closed.store(true, Ordering::Release);
        self.env.force_sync().map_err(backend)?;
        Ok(())
    }

    async fn stats(&self) -> HubResult<CacheStats> {
        Ok(self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
