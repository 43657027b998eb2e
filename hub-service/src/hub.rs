//! Assembled hub: backends, coordinator and services wired from a config.

use std::sync::Arc;

use hub_core::{ConfigError, HubConfig, HubResult};
use hub_storage::{Cache, DurableStore, LmdbCache, LmdbStore, MemoryCache, MemoryStore, StoreLimits};

use crate::coordinator::CacheAsideCoordinator;
use crate::services::{ContactService, UserService};

/// Hub over the in-process backends.
pub type MemoryHub = Hub<MemoryStore, MemoryCache>;

/// Hub over LMDB-backed store and cache.
pub type LmdbHub = Hub<LmdbStore, LmdbCache>;

#[derive(Debug)]
pub struct Hub<S, C> {
    coordinator: CacheAsideCoordinator<S, C>,
    users: UserService<S, C>,
    contacts: ContactService<S, C>,
}

impl<S: DurableStore, C: Cache> Hub<S, C> {
    pub fn new(store: Arc<S>, cache: Arc<C>, config: HubConfig) -> HubResult<Self> {
        config.validate()?;
        let coordinator = CacheAsideCoordinator::new(store, cache, config);
        Ok(Self {
            users: UserService::new(coordinator.clone()),
            contacts: ContactService::new(coordinator.clone()),
            coordinator,
        })
    }

    pub fn users(&self) -> &UserService<S, C> {
        &self.users
    }

    pub fn contacts(&self) -> &ContactService<S, C> {
        &self.contacts
    }

    pub fn coordinator(&self) -> &CacheAsideCoordinator<S, C> {
        &self.coordinator
    }

    /// Close the cache. Later cache calls fail and are absorbed as misses.
    pub async fn shutdown(&self) -> HubResult<()> {
        self.coordinator.cache().close().await?;
        tracing::info!("Hub shut down");
        Ok(())
    }
}

impl MemoryHub {
    pub fn in_memory(config: HubConfig) -> HubResult<Self> {
        let store = MemoryStore::with_limits(StoreLimits::from(&config.store));
        Self::new(Arc::new(store), Arc::new(MemoryCache::new()), config)
    }
}

impl LmdbHub {
    /// Open store and cache under `store.data_dir` (`table/` and `cache/`).
    pub fn open(config: HubConfig) -> HubResult<Self> {
        let data_dir = config
            .store
            .data_dir
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "store.data_dir".to_string(),
            })?;
        let store = LmdbStore::open(data_dir.join("table"), &config.store)?;
        let cache = LmdbCache::open(data_dir.join("cache"), config.store.map_size_mb)?;
        Self::new(Arc::new(store), Arc::new(cache), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{HubError, OpContext, StoreSettings};
    use tempfile::TempDir;

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = HubConfig::default().with_batch_write_limit(0);
        let err = MemoryHub::in_memory(config).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn test_lmdb_hub_requires_data_dir() {
        let err = LmdbHub::open(HubConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            HubError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_lmdb_hub_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = HubConfig::default().with_store(StoreSettings {
            data_dir: Some(dir.path().to_path_buf()),
            map_size_mb: 16,
            ..StoreSettings::default()
        });
        let ctx = OpContext::background();

        {
            let hub = LmdbHub::open(config.clone()).unwrap();
            hub.users()
                .create(&ctx, &hub_core::User::new("ada@example.com", "Ada", "L").with_id("u1"))
                .await
                .unwrap();
            hub.shutdown().await.unwrap();
        }

        let hub = LmdbHub::open(config).unwrap();
        let user = hub.users().get(&ctx, "u1").await.unwrap();
        assert_eq!(user.email, "ada@example.com");
    }
}
