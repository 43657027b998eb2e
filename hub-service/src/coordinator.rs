//! Cache-aside coordinator
//!
//! Reads go cache first, then store, then backfill the cache. Writes go to
//! the store first; only a committed write touches the cache, by refreshing
//! the point entry and dropping every derived view (lists, filtered lists,
//! dashboards) whose membership the write could have changed.
//!
//! The cache is never authoritative. Cache faults are logged and treated as
//! misses; they never change the outcome of a store operation.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hub_core::validation::{validate_identifier, validate_identity};
use hub_core::{
    encode, partition_key, sort_key_prefix, AttributeMap, CacheKey, Contact, DeletePolicy,
    Entity, EntityType, HubConfig, HubError, HubResult, Identity, ItemKey, ListFilter, OpContext,
    Record, StorageError, User, ValidationError,
};
use hub_storage::{Cache, DurableStore, TransactItem};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Orchestrates every entity operation across a [`DurableStore`] and a
/// [`Cache`]. Both are injected at construction.
#[derive(Debug)]
pub struct CacheAsideCoordinator<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    config: HubConfig,
}

impl<S, C> Clone for CacheAsideCoordinator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}

impl<S: DurableStore, C: Cache> CacheAsideCoordinator<S, C> {
    pub fn new(store: Arc<S>, cache: Arc<C>, config: HubConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // ========================================================================
    // ENTITY LIFECYCLE
    // ========================================================================

    /// Insert a new entity. Fails with `AlreadyExists` when its keys are taken;
    /// the cache is left alone in that case.
    pub async fn create<E: Entity>(&self, ctx: &OpContext, entity: &E) -> HubResult<E> {
        entity.validate()?;
        let ctx = ctx.or_timeout(self.config.operation_timeout);

        let now = chrono::Utc::now();
        let mut record = entity.to_record();
        record.created_at = now;
        record.updated_at = now;

        ctx.run(self.store.put_if_absent(&ctx, record.clone()))
            .await?;
        tracing::info!(
            entity_type = %E::ENTITY_TYPE,
            key = %record.key(),
            "Entity created"
        );

        let created = E::from_record(&record)?;
        let identity = created.identity();
        let point = CacheKey::entity(E::ENTITY_TYPE, identity.clone());
        self.settle(|settle| async move {
            self.cache_put(&settle, &point, &record, self.config.cache.entity_ttl)
                .await;
            let filters = E::matching_filters(&record);
            let keys = self.view_keys::<E>(identity.owner(), &identity, filters);
            self.invalidate(&settle, keys).await;
        })
        .await;

        Ok(created)
    }

    /// Point read. `NotFound` when the row is absent.
    pub async fn get<E: Entity>(&self, ctx: &OpContext, identity: &Identity) -> HubResult<E> {
        validate_identity(E::ENTITY_TYPE, identity)?;
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = item_key(E::ENTITY_TYPE, identity);
        let point = CacheKey::entity(E::ENTITY_TYPE, identity.clone());

        let record: Record = self
            .read_through(&ctx, &point, self.config.cache.entity_ttl, || {
                ctx.run(self.store.get(&ctx, &key))
            })
            .await?;
        E::from_record(&record)
    }

    /// Partial update. Only the named attributes change and `updated_at`
    /// advances. On `NotFound` nothing is invalidated.
    ///
    /// Once the write may have landed, the point entry and views are
    /// refreshed or dropped even if the operation then fails.
    pub async fn update<E: Entity>(
        &self,
        ctx: &OpContext,
        identity: &Identity,
        changes: &AttributeMap,
    ) -> HubResult<E> {
        validate_identity(E::ENTITY_TYPE, identity)?;
        E::validate_changes(changes)?;
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = item_key(E::ENTITY_TYPE, identity);
        let point = CacheKey::entity(E::ENTITY_TYPE, identity.clone());

        let written = match ctx.run(self.store.update(&ctx, &key, changes)).await {
            Ok(record) => record,
            Err(e) => {
                if write_may_have_landed(&e) {
                    let mut keys = vec![point];
                    keys.extend(self.update_view_keys::<E>(identity, None));
                    self.settle(|settle| async move { self.invalidate(&settle, keys).await })
                        .await;
                }
                return Err(e);
            }
        };
        tracing::info!(
            entity_type = %E::ENTITY_TYPE,
            key = %key,
            attributes = changes.len(),
            "Entity updated"
        );

        // Authoritative re-read, so the cached value is exactly what the
        // store now holds.
        let reread = ctx
            .run(self.store.get(&ctx, &key))
            .await
            .and_then(|record| E::from_record(&record).map(|entity| (record, entity)));
        let stored_identity = match &reread {
            Ok((_, entity)) => Some(entity.identity()),
            Err(_) => E::from_record(&written).ok().map(|entity| entity.identity()),
        };
        let views = self.update_view_keys::<E>(
            identity,
            stored_identity.as_ref().and_then(Identity::owner),
        );

        let outcome = &reread;
        self.settle(|settle| async move {
            match outcome {
                Ok((record, _)) => self.refresh_point(&settle, &point, record).await,
                Err(e) => {
                    tracing::warn!(
                        cache_key = %point,
                        error = %e,
                        "Re-read after update failed, dropping cached entry"
                    );
                    self.invalidate(&settle, vec![point]).await;
                }
            }
            self.invalidate(&settle, views).await;
        })
        .await;

        reread.map(|(_, entity)| entity)
    }

    /// Remove an entity, applying the configured [`DeletePolicy`] to any
    /// rows sharing its partition. Returns the removed entity.
    ///
    /// A cascade that fails part way still invalidates every child it may
    /// have removed before the error is returned.
    pub async fn delete<E: Entity>(&self, ctx: &OpContext, identity: &Identity) -> HubResult<E> {
        validate_identity(E::ENTITY_TYPE, identity)?;
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = item_key(E::ENTITY_TYPE, identity);

        // Learn the relation identifiers before the row is gone.
        let existing = ctx.run(self.store.get(&ctx, &key)).await?;

        let children = self.children_of::<E>(&ctx, identity, &key).await?;
        let cascading = match self.config.delete_policy {
            DeletePolicy::Restrict if !children.is_empty() => {
                return Err(ValidationError::HasChildren {
                    pk: key.pk.clone(),
                    children: children.len(),
                }
                .into());
            }
            DeletePolicy::Cascade => !children.is_empty(),
            _ => false,
        };
        let result = if cascading {
            self.cascade(&ctx, &key, &children)
                .await
                .map(|()| existing.clone())
        } else {
            ctx.run(self.store.delete(&ctx, &key)).await
        };

        let touched = match &result {
            Ok(_) => {
                tracing::info!(
                    entity_type = %E::ENTITY_TYPE,
                    key = %key,
                    children = children.len(),
                    policy = ?self.config.delete_policy,
                    "Entity deleted"
                );
                true
            }
            Err(e) if cascading || write_may_have_landed(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Delete failed after writing, invalidating affected entries"
                );
                true
            }
            Err(_) => false,
        };
        if !touched {
            return result.and_then(|removed| E::from_record(&removed));
        }

        let point = CacheKey::entity(E::ENTITY_TYPE, identity.clone());
        self.settle(|settle| async move {
            let mut keys = vec![point];
            keys.extend(self.view_keys::<E>(
                identity.owner(),
                identity,
                E::matching_filters(&existing),
            ));
            if cascading {
                for child in &children {
                    for key in child_keys(child) {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
            }
            self.invalidate(&settle, keys).await;
        })
        .await;

        result.and_then(|removed| E::from_record(&removed))
    }

    // ========================================================================
    // LIST READS
    // ========================================================================

    /// Every entity of the type, via the type index.
    pub async fn list<E: Entity>(&self, ctx: &OpContext) -> HubResult<Vec<E>> {
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = CacheKey::list_all(E::ENTITY_TYPE);
        let records: Vec<Record> = self
            .read_through(&ctx, &key, self.config.cache.list_ttl, || {
                ctx.run(self.store.query_by_type(&ctx, E::ENTITY_TYPE))
            })
            .await?;
        decode_all(&records)
    }

    /// Entities stored under one owner's partition, in sort-key order.
    pub async fn list_by_relation<E: Entity>(
        &self,
        ctx: &OpContext,
        owner_id: &str,
    ) -> HubResult<Vec<E>> {
        let pk = owner_partition::<E>(owner_id)?;
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = CacheKey::list_owned(E::ENTITY_TYPE, owner_id);
        let prefix = sort_key_prefix(E::ENTITY_TYPE);
        let records: Vec<Record> = self
            .read_through(&ctx, &key, self.config.cache.list_ttl, || {
                ctx.run(self.store.query(&ctx, &pk, &prefix))
            })
            .await?;
        decode_all(&records)
    }

    /// Entities under one owner matching a named filter. The predicate runs
    /// inside the store.
    pub async fn list_filtered<E: Entity>(
        &self,
        ctx: &OpContext,
        owner_id: &str,
        filter: ListFilter,
    ) -> HubResult<Vec<E>> {
        let pk = owner_partition::<E>(owner_id)?;
        if !E::supported_filters().contains(&filter) {
            return Err(ValidationError::InvalidValue {
                field: "filter".to_string(),
                reason: format!("{} lists have no {} view", E::ENTITY_TYPE, filter.name()),
            }
            .into());
        }
        let ctx = ctx.or_timeout(self.config.operation_timeout);
        let key = CacheKey::list_filtered(E::ENTITY_TYPE, owner_id, filter);
        let prefix = sort_key_prefix(E::ENTITY_TYPE);
        let predicate = filter.predicate();
        let records: Vec<Record> = self
            .read_through(&ctx, &key, self.config.cache.list_ttl, || {
                ctx.run(self.store.query_with_filter(&ctx, &pk, &prefix, &predicate))
            })
            .await?;
        decode_all(&records)
    }

    // ========================================================================
    // CACHE PLUMBING
    // ========================================================================

    /// Serve `key` from the cache, or fetch it and backfill.
    ///
    /// Cache faults and undecodable entries count as misses. Cancellation and
    /// deadline expiry still propagate.
    pub(crate) async fn read_through<T, F, Fut>(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> HubResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = HubResult<T>>,
    {
        let cache_key = key.to_string();
        match ctx.run(self.cache.get(ctx, &cache_key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    tracing::debug!(cache_key = %cache_key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        cache_key = %cache_key,
                        error = %e,
                        "Undecodable cache entry, reading from store"
                    );
                }
            },
            Ok(None) => tracing::debug!(cache_key = %cache_key, "Cache miss"),
            Err(HubError::Cache(e)) => {
                tracing::warn!(
                    cache_key = %cache_key,
                    error = %e,
                    "Cache get failed, treating as miss"
                );
            }
            Err(e) => return Err(e),
        }

        let value = fetch().await?;
        self.cache_put(ctx, key, &value, ttl).await;
        Ok(value)
    }

    /// Best-effort cache write.
    async fn cache_put<T: Serialize>(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let cache_key = key.to_string();
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(cache_key = %cache_key, error = %e, "Cache value not encodable");
                return false;
            }
        };
        match ctx.run(self.cache.set(ctx, &cache_key, bytes, ttl)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(cache_key = %cache_key, error = %e, "Cache set failed");
                false
            }
        }
    }

    /// Overwrite a point entry with the store's value. When the write fails
    /// the entry is dropped instead, so no stale value outlives the update.
    async fn refresh_point(&self, ctx: &OpContext, key: &CacheKey, record: &Record) {
        if !self
            .cache_put(ctx, key, record, self.config.cache.entity_ttl)
            .await
        {
            self.invalidate(ctx, vec![key.clone()]).await;
        }
    }

    /// Best-effort, sequential deletion of cache keys.
    pub(crate) async fn invalidate(&self, ctx: &OpContext, keys: Vec<CacheKey>) {
        for key in keys {
            let cache_key = key.to_string();
            match ctx.run(self.cache.delete(ctx, &cache_key)).await {
                Ok(()) => tracing::debug!(cache_key = %cache_key, "Cache invalidated"),
                Err(e) => tracing::warn!(
                    cache_key = %cache_key,
                    error = %e,
                    "Cache invalidation failed"
                ),
            }
        }
    }

    /// Run the cache side of a committed write.
    ///
    /// The store write already happened, so these steps get their own
    /// context bounded by the operation timeout instead of the caller's,
    /// which may have been cancelled by now.
    async fn settle<F, Fut>(&self, steps: F)
    where
        F: FnOnce(OpContext) -> Fut,
        Fut: Future<Output = ()>,
    {
        steps(OpContext::with_timeout(self.config.operation_timeout)).await
    }

    /// Views whose membership a write to `identity` can change: the
    /// type-wide list, the owner's list and filtered lists, and the
    /// dashboard of the user whose partition holds the row.
    fn view_keys<E: Entity>(
        &self,
        owner: Option<&str>,
        identity: &Identity,
        filters: Vec<ListFilter>,
    ) -> Vec<CacheKey> {
        let mut keys = vec![CacheKey::list_all(E::ENTITY_TYPE)];
        if let Some(owner) = owner {
            keys.push(CacheKey::list_owned(E::ENTITY_TYPE, owner));
            keys.extend(
                filters
                    .into_iter()
                    .map(|f| CacheKey::list_filtered(E::ENTITY_TYPE, owner, f)),
            );
        }
        if let Some(user_id) = dashboard_owner(E::ENTITY_TYPE, owner, &identity.id) {
            keys.push(CacheKey::dashboard(user_id));
        }
        keys
    }

    /// Views touched by an update: those of the requested owner and of the
    /// stored owner, deduplicated, across every supported filter.
    fn update_view_keys<E: Entity>(
        &self,
        identity: &Identity,
        stored_owner: Option<&str>,
    ) -> Vec<CacheKey> {
        let owners: BTreeSet<Option<&str>> = [identity.owner(), stored_owner.or(identity.owner())]
            .into_iter()
            .collect();
        let mut keys = Vec::new();
        for owner in owners {
            let filters = E::supported_filters().to_vec();
            for key in self.view_keys::<E>(owner, identity, filters) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    // ========================================================================
    // DELETE POLICY
    // ========================================================================

    /// Rows stored in the partition `key` heads, excluding `key` itself.
    /// Only looked up when the policy needs them.
    async fn children_of<E: Entity>(
        &self,
        ctx: &OpContext,
        identity: &Identity,
        key: &ItemKey,
    ) -> HubResult<Vec<Record>> {
        let heads_partition = identity.owner().is_none() && !E::ENTITY_TYPE.children().is_empty();
        if !heads_partition || matches!(self.config.delete_policy, DeletePolicy::Orphan) {
            return Ok(Vec::new());
        }
        let rows = ctx.run(self.store.query(ctx, &key.pk, "")).await?;
        Ok(rows.into_iter().filter(|r| r.key() != *key).collect())
    }

    /// Delete a parent with its children: atomically when everything fits
    /// in one transaction, otherwise children in chunked batches then the
    /// parent.
    async fn cascade(
        &self,
        ctx: &OpContext,
        parent: &ItemKey,
        children: &[Record],
    ) -> HubResult<()> {
        let limit = self.store.limits().transaction;
        if children.len() < limit {
            let mut items: Vec<TransactItem> =
                children.iter().map(|c| TransactItem::delete(c.key())).collect();
            items.push(TransactItem::delete(parent.clone()));
            return ctx.run(self.store.transaction(ctx, items)).await;
        }

        tracing::warn!(
            key = %parent,
            children = children.len(),
            limit,
            "Cascade exceeds transaction limit, deleting children in batches"
        );
        let keys = children.iter().map(Record::key).collect();
        ctx.run(self.store.batch_write(ctx, Vec::new(), keys)).await?;
        ctx.run(self.store.delete(ctx, parent)).await.map(|_| ())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn item_key(entity_type: EntityType, identity: &Identity) -> ItemKey {
    encode(entity_type, identity).item_key()
}

/// Whether a failed write may still have been applied.
fn write_may_have_landed(err: &HubError) -> bool {
    matches!(
        err,
        HubError::Cancelled
            | HubError::DeadlineExceeded
            | HubError::Storage(StorageError::PartialBatch { .. })
    )
}

fn decode_all<E: Entity>(records: &[Record]) -> HubResult<Vec<E>> {
    records.iter().map(E::from_record).collect()
}

/// Partition key of the owner of `E` rows, after checking `E` is owned.
fn owner_partition<E: Entity>(owner_id: &str) -> HubResult<String> {
    let owner_type = E::ENTITY_TYPE.owner().ok_or_else(|| ValidationError::InvalidValue {
        field: "owner_id".to_string(),
        reason: format!("{} entities have no owner", E::ENTITY_TYPE),
    })?;
    validate_identifier("owner_id", owner_id)?;
    Ok(partition_key(owner_type, owner_id))
}

/// The user whose dashboard shows a row of `entity_type`.
fn dashboard_owner<'a>(
    entity_type: EntityType,
    owner: Option<&'a str>,
    id: &'a str,
) -> Option<&'a str> {
    match entity_type.owner() {
        None if entity_type == EntityType::User => Some(id),
        Some(EntityType::User) => owner,
        _ => None,
    }
}

/// Point and view keys of a child row removed by a cascade.
fn child_keys(child: &Record) -> Vec<CacheKey> {
    let entity_type = child.entity_type;
    let Some(id) = child.sk.strip_prefix(&sort_key_prefix(entity_type)) else {
        return Vec::new();
    };
    let Some(owner) = child.pk.split_once('#').map(|(_, owner)| owner) else {
        return Vec::new();
    };
    let mut keys = vec![
        CacheKey::entity(entity_type, Identity::owned(owner, id)),
        CacheKey::list_all(entity_type),
        CacheKey::list_owned(entity_type, owner),
    ];
    keys.extend(
        filters_of(entity_type)
            .iter()
            .map(|f| CacheKey::list_filtered(entity_type, owner, *f)),
    );
    keys
}

fn filters_of(entity_type: EntityType) -> &'static [ListFilter] {
    match entity_type {
        EntityType::User => User::supported_filters(),
        EntityType::Contact => Contact::supported_filters(),
    }
}
