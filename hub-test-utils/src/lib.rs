//! HUB Test Utilities
//!
//! Centralized test infrastructure for the hub workspace:
//! - Fault-injecting cache and store wrappers
//! - Proptest generators for entities and updates
//! - Test fixtures for common scenarios
//! - Custom assertions for hub error kinds

// Re-export storage backends from their source crate
pub use hub_storage::{Cache, CacheStats, DurableStore, MemoryCache, MemoryStore, StoreStats};

// Re-export core types for convenience
pub use hub_core::{
    AttributeMap, CacheError, Contact, Entity, EntityType, HubConfig, HubError, HubResult,
    Identity, ItemKey, OpContext, Record, StorageError, User, ValidationError,
};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{Predicate, StoreSettings};
use hub_storage::{StoreLimits, TransactItem, WriteOp};

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Wraps a [`Cache`] and fails selected operations on demand.
///
/// Call counters only count calls that reached the wrapper, failed or not.
#[derive(Debug, Default)]
pub struct FlakyCache<C> {
    inner: C,
    fail_gets: AtomicBool,
    fail_sets: AtomicBool,
    fail_deletes: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl<C: Cache> FlakyCache<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            fail_gets: AtomicBool::new(false),
            fail_sets: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Fail (or stop failing) every operation.
    pub fn fail_all(&self, fail: bool) {
        self.fail_gets(fail);
        self.fail_sets(fail);
        self.fail_deletes(fail);
    }

    pub fn get_calls(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    fn injected(op: &str) -> HubError {
        CacheError::Backend {
            reason: format!("injected {} failure", op),
        }
        .into()
    }
}

#[async_trait]
impl<C: Cache> Cache for FlakyCache<C> {
    async fn get(&self, ctx: &OpContext, key: &str) -> HubResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(ctx, key).await
    }

    async fn set(
        &self,
        ctx: &OpContext,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> HubResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(Self::injected("set"));
        }
        self.inner.set(ctx, key, value, ttl).await
    }

    async fn delete(&self, ctx: &OpContext, key: &str) -> HubResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(ctx, key).await
    }

    async fn close(&self) -> HubResult<()> {
        self.inner.close().await
    }

    async fn stats(&self) -> HubResult<CacheStats> {
        self.inner.stats().await
    }
}

/// Wraps a [`DurableStore`], counting point reads and injecting faults or
/// latency.
#[derive(Debug, Default)]
pub struct FlakyStore<S> {
    inner: S,
    fail_all: AtomicBool,
    /// Zero-based index of the batch write chunk to fail, counted across calls.
    fail_batch_chunk: Mutex<Option<usize>>,
    batch_chunks_seen: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    gets: AtomicU64,
    queries: AtomicU64,
}

impl<S: DurableStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            fail_batch_chunk: Mutex::new(None),
            batch_chunks_seen: AtomicUsize::new(0),
            delay: Mutex::new(None),
            gets: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make every operation fail with a transient backend error.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_batch_chunk(&self, index: Option<usize>) {
        if let Ok(mut slot) = self.fail_batch_chunk.lock() {
            *slot = index;
        }
        self.batch_chunks_seen.store(0, Ordering::SeqCst);
    }

    /// Sleep this long before every operation.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = delay;
        }
    }

    /// Point reads served by the store.
    pub fn get_calls(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Queries of any kind served by the store.
    pub fn query_calls(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    async fn before(&self) -> HubResult<()> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "injected store failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DurableStore> DurableStore for FlakyStore<S> {
    async fn put(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        self.before().await?;
        self.inner.put(ctx, record).await
    }

    async fn put_if_absent(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        self.before().await?;
        self.inner.put_if_absent(ctx, record).await
    }

    async fn get(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.before().await?;
        self.inner.get(ctx, key).await
    }

    async fn update(
        &self,
        ctx: &OpContext,
        key: &ItemKey,
        changes: &AttributeMap,
    ) -> HubResult<Record> {
        self.before().await?;
        self.inner.update(ctx, key, changes).await
    }

    async fn delete(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        self.before().await?;
        self.inner.delete(ctx, key).await
    }

    async fn query(&self, ctx: &OpContext, pk: &str, sk_prefix: &str) -> HubResult<Vec<Record>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.before().await?;
        self.inner.query(ctx, pk, sk_prefix).await
    }

    async fn query_by_type(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
    ) -> HubResult<Vec<Record>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.before().await?;
        self.inner.query_by_type(ctx, entity_type).await
    }

    async fn query_with_filter(
        &self,
        ctx: &OpContext,
        pk: &str,
        sk_prefix: &str,
        predicate: &Predicate,
    ) -> HubResult<Vec<Record>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.before().await?;
        self.inner
            .query_with_filter(ctx, pk, sk_prefix, predicate)
            .await
    }

    async fn batch_get_chunk(&self, ctx: &OpContext, keys: &[ItemKey]) -> HubResult<Vec<Record>> {
        self.before().await?;
        self.inner.batch_get_chunk(ctx, keys).await
    }

    async fn batch_write_chunk(&self, ctx: &OpContext, ops: &[WriteOp]) -> HubResult<()> {
        self.before().await?;
        let index = self.batch_chunks_seen.fetch_add(1, Ordering::SeqCst);
        let fail_at = self.fail_batch_chunk.lock().ok().and_then(|slot| *slot);
        if fail_at == Some(index) {
            return Err(StorageError::Backend {
                reason: format!("injected failure in batch chunk {}", index),
            }
            .into());
        }
        self.inner.batch_write_chunk(ctx, ops).await
    }

    async fn transaction(&self, ctx: &OpContext, items: Vec<TransactItem>) -> HubResult<()> {
        self.before().await?;
        self.inner.transaction(ctx, items).await
    }

    fn limits(&self) -> StoreLimits {
        self.inner.limits()
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating hub entities and updates.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Identifier accepted by validation: no separators, no control chars.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_-]{1,24}".prop_filter("reserved identifier", |s| {
            s != "list" && s != "dashboard"
        })
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z]{1,10}", "[a-z]{2,4}")
            .prop_map(|(local, domain, tld)| format!("{}@{}.{}", local, domain, tld))
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{1,12}"
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (arb_identifier(), arb_email(), arb_name(), arb_name()).prop_map(
            |(id, email, first, last)| User::new(email, first, last).with_id(id),
        )
    }

    pub fn arb_contact(user_id: String) -> impl Strategy<Value = Contact> {
        (
            arb_identifier(),
            arb_name(),
            arb_email(),
            proptest::option::of("[0-9]{7,10}"),
            proptest::option::of(arb_name()),
            any::<bool>(),
            proptest::collection::vec("[a-z]{1,8}", 0..4),
        )
            .prop_map(move |(id, name, email, phone, company, favorite, tags)| {
                let mut contact = Contact::new(user_id.clone(), name, email)
                    .with_id(id)
                    .with_favorite(favorite)
                    .with_tags(tags);
                contact.phone = phone;
                contact.company = company;
                contact
            })
    }

    /// Non-empty, well-typed partial update of a contact.
    pub fn arb_contact_changes() -> impl Strategy<Value = AttributeMap> {
        proptest::collection::vec(field_strategy(), 1..4)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    fn field_strategy() -> impl Strategy<Value = (String, Value)> {
        prop_oneof![
            arb_name().prop_map(|v| ("name".to_string(), Value::String(v))),
            arb_email().prop_map(|v| ("email".to_string(), Value::String(v))),
            "[0-9]{7,10}".prop_map(|v| ("phone".to_string(), Value::String(v))),
            arb_name().prop_map(|v| ("company".to_string(), Value::String(v))),
            any::<bool>().prop_map(|v| ("is_favorite".to_string(), Value::Bool(v))),
            proptest::collection::vec("[a-z]{1,8}", 0..3).prop_map(|v| (
                "tags".to_string(),
                Value::Array(v.into_iter().map(Value::String).collect())
            )),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made entities and configuration for tests.

    use super::*;

    /// Config with small limits so chunking is easy to trigger.
    pub fn small_batch_config() -> HubConfig {
        HubConfig::default().with_store(StoreSettings {
            batch_write_limit: 2,
            batch_get_limit: 2,
            transaction_limit: 3,
            ..StoreSettings::default()
        })
    }

    pub fn ada() -> User {
        User::new("ada@example.com", "Ada", "Lovelace").with_id("u-ada")
    }

    pub fn grace() -> User {
        User::new("grace@example.com", "Grace", "Hopper").with_id("u-grace")
    }

    pub fn contact_of(user_id: &str, id: &str) -> Contact {
        Contact::new(user_id, format!("Contact {}", id), format!("{}@example.com", id))
            .with_id(id)
    }

    pub fn favorite_of(user_id: &str, id: &str) -> Contact {
        contact_of(user_id, id).with_favorite(true)
    }

    /// `count` contacts under one user, ids `c000`, `c001`, ...
    pub fn contacts_of(user_id: &str, count: usize) -> Vec<Contact> {
        (0..count)
            .map(|i| contact_of(user_id, &format!("c{:03}", i)))
            .collect()
    }

    pub fn store_limits(config: &HubConfig) -> StoreLimits {
        StoreLimits::from(&config.store)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on hub error kinds.

    use super::*;

    pub fn assert_not_found<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(e) if e.is_not_found() => {}
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    pub fn assert_already_exists<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(e) if e.is_already_exists() => {}
            other => panic!("Expected AlreadyExists, got {:?}", other),
        }
    }

    pub fn assert_validation_error<T: std::fmt::Debug>(result: &HubResult<T>) {
        match result {
            Err(HubError::Validation(_)) => {}
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    pub fn assert_partial_batch<T: std::fmt::Debug>(
        result: &HubResult<T>,
        expected_completed: usize,
    ) {
        match result {
            Err(HubError::Storage(StorageError::PartialBatch {
                completed_chunks, ..
            })) => assert_eq!(*completed_chunks, expected_completed),
            other => panic!("Expected PartialBatch, got {:?}", other),
        }
    }

    /// Same row identity and attributes; timestamps may differ.
    pub fn assert_same_content(a: &Record, b: &Record) {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.entity_type, b.entity_type);
        assert_eq!(a.attributes, b.attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_cache_injects_and_counts() {
        let cache = FlakyCache::new(MemoryCache::new());
        let ctx = OpContext::background();
        cache.fail_sets(true);
        let err = cache
            .set(&ctx, "k", vec![1], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Cache(CacheError::Backend { .. })));
        cache.fail_sets(false);
        cache
            .set(&ctx, "k", vec![1], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cache.set_calls(), 2);
        assert_eq!(cache.get(&ctx, "k").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_flaky_store_fails_selected_chunk() {
        let store = FlakyStore::new(MemoryStore::new());
        let ctx = OpContext::background();
        store.fail_batch_chunk(Some(1));

        let puts: Vec<Record> = fixtures::contacts_of("u1", 30)
            .iter()
            .map(Entity::to_record)
            .collect();
        let result = store.batch_write(&ctx, puts, Vec::new()).await;
        assertions::assert_partial_batch(&result, 1);
        assert_eq!(store.inner().len(), 25);
    }
}
