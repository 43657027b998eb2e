//! In-process table with a type index, for tests and single-node use.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use hub_core::{
    AttributeMap, EntityType, HubResult, ItemKey, OpContext, Predicate, Record, StorageError,
};

use super::{
    check_distinct_keys, DurableStore, StoreCounters, StoreLimits, StoreStats, TransactItem,
    WriteOp,
};

/// Type index entry: (gsi1_pk, gsi1_sk, primary key).
type IndexEntry = (String, String, ItemKey);

#[derive(Debug, Default)]
struct Table {
    items: BTreeMap<ItemKey, Record>,
    by_type: BTreeSet<IndexEntry>,
}

impl Table {
    fn insert(&mut self, record: Record) {
        if let Some(old) = self.items.get(&record.key()) {
            self.by_type.remove(&index_entry(old));
        }
        self.by_type.insert(index_entry(&record));
        self.items.insert(record.key(), record);
    }

    fn remove(&mut self, key: &ItemKey) -> Option<Record> {
        let old = self.items.remove(key)?;
        self.by_type.remove(&index_entry(&old));
        Some(old)
    }

    fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Put(record) => self.insert(record.clone()),
            WriteOp::Delete(key) => {
                self.remove(key);
            }
        }
    }

    fn scan<'a>(&'a self, pk: &'a str, sk_prefix: &'a str) -> impl Iterator<Item = &'a Record> {
        let start = ItemKey::new(pk, sk_prefix);
        self.items
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| key.pk == pk && key.sk.starts_with(sk_prefix))
            .map(|(_, record)| record)
    }

    /// Primary keys under one type tag, in index sort-key order.
    fn type_scan<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a ItemKey> {
        let start: IndexEntry = (tag.to_string(), String::new(), ItemKey::new("", ""));
        self.by_type
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(gsi_pk, _, _)| gsi_pk == tag)
            .map(|(_, _, key)| key)
    }
}

fn index_entry(record: &Record) -> IndexEntry {
    (
        record.gsi1_pk.clone(),
        record.gsi1_sk.clone(),
        record.key(),
    )
}

fn not_found(key: &ItemKey) -> StorageError {
    StorageError::NotFound {
        pk: key.pk.clone(),
        sk: key.sk.clone(),
    }
}

/// [`DurableStore`] held entirely in memory behind one lock.
///
/// Every operation, including a whole batch chunk or transaction, runs
/// under a single write lock, so conditional writes are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<Table>,
    limits: StoreLimits,
    counters: StoreCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> HubResult<std::sync::RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> HubResult<std::sync::RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        ctx.check()?;
        self.write()?.insert(record);
        Ok(())
    }

    async fn put_if_absent(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        ctx.check()?;
        let mut table = self.write()?;
        if table.items.contains_key(&record.key()) {
            return Err(StorageError::AlreadyExists {
                pk: record.pk,
                sk: record.sk,
            }
            .into());
        }
        table.insert(record);
        Ok(())
    }

    async fn get(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        ctx.check()?;
        self.read()?
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key).into())
    }

    async fn update(
        &self,
        ctx: &OpContext,
        key: &ItemKey,
        changes: &AttributeMap,
    ) -> HubResult<Record> {
        ctx.check()?;
        let mut table = self.write()?;
        let record = table.items.get_mut(key).ok_or_else(|| not_found(key))?;
        record.apply_changes(changes, Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        ctx.check()?;
        self.write()?
            .remove(key)
            .ok_or_else(|| not_found(key).into())
    }

    async fn query(&self, ctx: &OpContext, pk: &str, sk_prefix: &str) -> HubResult<Vec<Record>> {
        ctx.check()?;
        Ok(self.read()?.scan(pk, sk_prefix).cloned().collect())
    }

    async fn query_by_type(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
    ) -> HubResult<Vec<Record>> {
        ctx.check()?;
        let table = self.read()?;
        Ok(table
            .type_scan(entity_type.tag())
            .filter_map(|key| table.items.get(key).cloned())
            .collect())
    }

    async fn query_with_filter(
        &self,
        ctx: &OpContext,
        pk: &str,
        sk_prefix: &str,
        predicate: &Predicate,
    ) -> HubResult<Vec<Record>> {
        ctx.check()?;
        Ok(self
            .read()?
            .scan(pk, sk_prefix)
            .filter(|record| predicate.matches(record))
            .cloned()
            .collect())
    }

    async fn batch_get_chunk(&self, ctx: &OpContext, keys: &[ItemKey]) -> HubResult<Vec<Record>> {
        ctx.check()?;
        self.counters.batch_get();
        let table = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|key| table.items.get(key).cloned())
            .collect())
    }

    async fn batch_write_chunk(&self, ctx: &OpContext, ops: &[WriteOp]) -> HubResult<()> {
        ctx.check()?;
        if ops.len() > self.limits.batch_write {
            return Err(StorageError::Backend {
                reason: format!(
                    "batch of {} items exceeds the limit of {}",
                    ops.len(),
                    self.limits.batch_write
                ),
            }
            .into());
        }
        self.counters.batch_write();
        let mut table = self.write()?;
        for op in ops {
            table.apply(op);
        }
        Ok(())
    }

    async fn transaction(&self, ctx: &OpContext, items: Vec<TransactItem>) -> HubResult<()> {
        ctx.check()?;
        if items.len() > self.limits.transaction {
            return Err(StorageError::TransactionTooLarge {
                items: items.len(),
                limit: self.limits.transaction,
            }
            .into());
        }
        check_distinct_keys(&items)?;
        self.counters.transaction();

        let mut table = self.write()?;
        for item in &items {
            let exists = table.items.contains_key(&item.key());
            if let Some(reason) = item.conflict(exists) {
                return Err(StorageError::TransactionCanceled { reason }.into());
            }
        }
        for item in &items {
            table.apply(&item.op);
        }
        Ok(())
    }

    fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{encode, FilterExpr, HubError, Identity, Record};
    use serde_json::json;

    fn contact(owner: &str, id: &str, favorite: bool) -> Record {
        let mut attributes = AttributeMap::new();
        attributes.insert("id".to_string(), json!(id));
        attributes.insert("is_favorite".to_string(), json!(favorite));
        Record::new(
            EntityType::Contact,
            encode(EntityType::Contact, &Identity::owned(owner, id)),
            attributes,
            Utc::now(),
        )
    }

    fn user(id: &str) -> Record {
        Record::new(
            EntityType::User,
            encode(EntityType::User, &Identity::standalone(id)),
            AttributeMap::new(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_if_absent_conflicts() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        store.put_if_absent(&ctx, user("u1")).await.unwrap();
        let err = store.put_if_absent(&ctx, user("u1")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_row() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        let key = ItemKey::new("USER#ghost", "METADATA");
        let err = store
            .update(&ctx, &key, &AttributeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_absent_is_not_found() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        let err = store
            .delete(&ctx, &ItemKey::new("USER#ghost", "METADATA"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_query_prefix_and_order() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        store.put(&ctx, user("u1")).await.unwrap();
        store.put(&ctx, contact("u1", "b", false)).await.unwrap();
        store.put(&ctx, contact("u1", "a", true)).await.unwrap();
        store.put(&ctx, contact("u10", "z", true)).await.unwrap();

        let rows = store.query(&ctx, "USER#u1", "CONTACT#").await.unwrap();
        let sks: Vec<_> = rows.iter().map(|r| r.sk.as_str()).collect();
        assert_eq!(sks, vec!["CONTACT#a", "CONTACT#b"]);

        let whole = store.query(&ctx, "USER#u1", "").await.unwrap();
        assert_eq!(whole.len(), 3);
    }

    #[tokio::test]
    async fn test_query_by_type_and_filter() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        store.put(&ctx, user("u1")).await.unwrap();
        store.put(&ctx, contact("u1", "a", true)).await.unwrap();
        store.put(&ctx, contact("u2", "b", false)).await.unwrap();

        let contacts = store.query_by_type(&ctx, EntityType::Contact).await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert!(contacts.iter().all(|r| r.entity_type == EntityType::Contact));

        let favorites = store
            .query_with_filter(
                &ctx,
                "USER#u1",
                "CONTACT#",
                &FilterExpr::eq("is_favorite", json!(true)).into(),
            )
            .await
            .unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].sk, "CONTACT#a");
    }

    #[test]
    fn test_type_scan_stays_within_tag() {
        let mut table = Table::default();
        for id in ["u2", "u1"] {
            table.insert(user(id));
        }
        for (owner, id) in [("u1", "b"), ("u2", "a"), ("u1", "c")] {
            table.insert(contact(owner, id, false));
        }

        let users: Vec<_> = table.type_scan("USER").map(|k| k.pk.as_str()).collect();
        assert_eq!(users, vec!["USER#u1", "USER#u2"]);
        let contacts: Vec<_> = table.type_scan("CONTACT").map(|k| k.sk.as_str()).collect();
        assert_eq!(contacts, vec!["CONTACT#a", "CONTACT#b", "CONTACT#c"]);
        assert_eq!(table.type_scan("CONTACTS").count(), 0);
        assert_eq!(table.type_scan("").count(), 0);
    }

    #[tokio::test]
    async fn test_batch_write_chunks_at_limit() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        let puts: Vec<Record> = (0..30)
            .map(|i| contact("u1", &format!("c{:02}", i), false))
            .collect();
        store.batch_write(&ctx, puts, Vec::new()).await.unwrap();

        assert_eq!(store.stats().batch_write_calls, 2);
        assert_eq!(store.len(), 30);
    }

    #[tokio::test]
    async fn test_batch_get_chunks_and_skips_missing() {
        let store = MemoryStore::with_limits(StoreLimits {
            batch_get: 2,
            ..StoreLimits::default()
        });
        let ctx = OpContext::background();
        for id in ["a", "b", "c"] {
            store.put(&ctx, contact("u1", id, false)).await.unwrap();
        }
        let keys: Vec<ItemKey> = ["a", "b", "c", "missing"]
            .iter()
            .map(|id| ItemKey::new("USER#u1", format!("CONTACT#{}", id)))
            .collect();
        let found = store.batch_get(&ctx, &keys).await.unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(store.stats().batch_get_calls, 2);
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let store = MemoryStore::new();
        let ctx = OpContext::background();
        store.put(&ctx, user("u1")).await.unwrap();

        let err = store
            .transaction(
                &ctx,
                vec![
                    TransactItem::create(contact("u1", "new", false)),
                    TransactItem::create(user("u1")),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::Storage(StorageError::TransactionCanceled { .. })
        ));
        assert_eq!(store.len(), 1);

        store
            .transaction(
                &ctx,
                vec![
                    TransactItem::create(contact("u1", "new", false)),
                    TransactItem::delete(ItemKey::new("USER#u1", "METADATA")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().transaction_calls, 2);
    }

    #[tokio::test]
    async fn test_transaction_limit() {
        let store = MemoryStore::with_limits(StoreLimits {
            transaction: 1,
            ..StoreLimits::default()
        });
        let ctx = OpContext::background();
        let err = store
            .transaction(
                &ctx,
                vec![TransactItem::put(user("a")), TransactItem::put(user("b"))],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HubError::Storage(StorageError::TransactionTooLarge { items: 2, limit: 1 })
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_batch() {
        let store = MemoryStore::new();
        let (ctx, handle) = OpContext::background().cancellable();
        handle.cancel();
        let err = store
            .batch_write(&ctx, vec![user("u1")], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Cancelled));
        assert!(store.is_empty());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use hub_core::{encode, Identity};
    use proptest::prelude::*;
    use serde_json::json;

    fn id_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Query returns exactly the rows of the partition whose sort key has
        /// the prefix, in ascending sort-key order.
        #[test]
        fn prop_query_prefix_ordering(
            contact_ids in proptest::collection::btree_set(id_strategy(), 0..20),
            other_owner_ids in proptest::collection::vec(id_strategy(), 0..5),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                let ctx = OpContext::background();
                let now = Utc::now();
                store.put(&ctx, Record::new(
                    EntityType::User,
                    encode(EntityType::User, &Identity::standalone("owner")),
                    AttributeMap::new(),
                    now,
                )).await.unwrap();
                for id in &contact_ids {
                    let mut attrs = AttributeMap::new();
                    attrs.insert("id".to_string(), json!(id));
                    store.put(&ctx, Record::new(
                        EntityType::Contact,
                        encode(EntityType::Contact, &Identity::owned("owner", id.clone())),
                        attrs,
                        now,
                    )).await.unwrap();
                }
                for id in &other_owner_ids {
                    store.put(&ctx, Record::new(
                        EntityType::Contact,
                        encode(EntityType::Contact, &Identity::owned("owner2", id.clone())),
                        AttributeMap::new(),
                        now,
                    )).await.unwrap();
                }

                let rows = store.query(&ctx, "USER#owner", "CONTACT#").await.unwrap();
                let sks: Vec<String> = rows.iter().map(|r| r.sk.clone()).collect();
                let expected: Vec<String> =
                    contact_ids.iter().map(|id| format!("CONTACT#{}", id)).collect();
                prop_assert_eq!(sks, expected);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
