//! Durable store abstraction over a partitioned key-value table.
//!
//! Backends implement the point, query and single-chunk batch primitives.
//! The caller-facing [`DurableStore::batch_get`] and
//! [`DurableStore::batch_write`] are provided on top of them and split their
//! input at the backend's per-call item limit.

pub mod lmdb;
pub mod memory;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hub_core::{
    AttributeMap, EntityType, HubError, HubResult, ItemKey, OpContext, Predicate, Record,
    StorageError, StoreSettings,
};

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

/// One write in a batch or transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put(Record),
    Delete(ItemKey),
}

impl WriteOp {
    pub fn key(&self) -> ItemKey {
        match self {
            WriteOp::Put(record) => record.key(),
            WriteOp::Delete(key) => key.clone(),
        }
    }
}

/// Precondition a transaction item must satisfy for the transaction to commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    None,
    /// The row must not exist yet.
    NotExists,
    /// The row must exist.
    Exists,
}

/// Conditional write inside an atomic transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactItem {
    pub op: WriteOp,
    pub condition: Condition,
}

impl TransactItem {
    /// Unconditional insert-or-replace.
    pub fn put(record: Record) -> Self {
        Self {
            op: WriteOp::Put(record),
            condition: Condition::None,
        }
    }

    /// Insert that conflicts when the row already exists.
    pub fn create(record: Record) -> Self {
        Self {
            op: WriteOp::Put(record),
            condition: Condition::NotExists,
        }
    }

    /// Delete that conflicts when the row is already gone.
    pub fn delete(key: ItemKey) -> Self {
        Self {
            op: WriteOp::Delete(key),
            condition: Condition::Exists,
        }
    }

    pub fn key(&self) -> ItemKey {
        self.op.key()
    }

    /// Describe the conflict, if any, given whether the row exists now.
    pub(crate) fn conflict(&self, exists: bool) -> Option<String> {
        match (self.condition, exists) {
            (Condition::NotExists, true) => Some(format!("{} already exists", self.key())),
            (Condition::Exists, false) => Some(format!("{} does not exist", self.key())),
            _ => None,
        }
    }
}

/// Per-call item limits enforced by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub batch_write: usize,
    pub batch_get: usize,
    pub transaction: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for StoreLimits {
    fn from(settings: &StoreSettings) -> Self {
        Self {
            batch_write: settings.batch_write_limit.max(1),
            batch_get: settings.batch_get_limit.max(1),
            transaction: settings.transaction_limit.max(1),
        }
    }
}

/// Count of physical multi-item calls a backend has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub batch_get_calls: u64,
    pub batch_write_calls: u64,
    pub transaction_calls: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    batch_get_calls: AtomicU64,
    batch_write_calls: AtomicU64,
    transaction_calls: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn batch_get(&self) {
        self.batch_get_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_write(&self) {
        self.batch_write_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction(&self) {
        self.transaction_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            batch_get_calls: self.batch_get_calls.load(Ordering::Relaxed),
            batch_write_calls: self.batch_write_calls.load(Ordering::Relaxed),
            transaction_calls: self.transaction_calls.load(Ordering::Relaxed),
        }
    }
}

/// Reject a transaction that touches the same row twice.
pub(crate) fn check_distinct_keys(items: &[TransactItem]) -> HubResult<()> {
    let mut seen = std::collections::BTreeSet::new();
    for item in items {
        let key = item.key();
        if !seen.insert(key.clone()) {
            return Err(StorageError::TransactionCanceled {
                reason: format!("{} appears more than once", key),
            }
            .into());
        }
    }
    Ok(())
}

/// Crash-durable table with conditional writes, prefix queries, a type
/// index, bounded batches and atomic transactions.
///
/// Every method takes the caller's [`OpContext`] and fails with
/// `Cancelled` / `DeadlineExceeded` instead of starting a physical call once
/// the context is done.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Unconditional insert-or-replace.
    async fn put(&self, ctx: &OpContext, record: Record) -> HubResult<()>;

    /// Insert only if `(pk, sk)` is free; `AlreadyExists` otherwise.
    async fn put_if_absent(&self, ctx: &OpContext, record: Record) -> HubResult<()>;

    async fn get(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record>;

    /// Merge the named attributes into an existing row and advance
    /// `updated_at`. Never creates a row. Returns the row as stored.
    async fn update(
        &self,
        ctx: &OpContext,
        key: &ItemKey,
        changes: &AttributeMap,
    ) -> HubResult<Record>;

    /// Remove an existing row, returning what was stored.
    async fn delete(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record>;

    /// Rows of partition `pk` whose sort key starts with `sk_prefix`,
    /// ascending by sort key. An empty prefix selects the whole partition.
    async fn query(&self, ctx: &OpContext, pk: &str, sk_prefix: &str) -> HubResult<Vec<Record>>;

    /// Every row of one entity type, via the type index.
    async fn query_by_type(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
    ) -> HubResult<Vec<Record>>;

    /// `query`, keeping only rows that satisfy `predicate`. The predicate is
    /// evaluated while scanning.
    async fn query_with_filter(
        &self,
        ctx: &OpContext,
        pk: &str,
        sk_prefix: &str,
        predicate: &Predicate,
    ) -> HubResult<Vec<Record>>;

    /// One physical batch read of at most `limits().batch_get` keys.
    /// Absent keys are skipped.
    async fn batch_get_chunk(&self, ctx: &OpContext, keys: &[ItemKey]) -> HubResult<Vec<Record>>;

    /// One physical batch write of at most `limits().batch_write` ops.
    /// Unconditional; the chunk is applied as a unit.
    async fn batch_write_chunk(&self, ctx: &OpContext, ops: &[WriteOp]) -> HubResult<()>;

    /// All-or-nothing commit of up to `limits().transaction` items. A failed
    /// condition cancels the whole transaction and changes nothing.
    async fn transaction(&self, ctx: &OpContext, items: Vec<TransactItem>) -> HubResult<()>;

    fn limits(&self) -> StoreLimits;

    fn stats(&self) -> StoreStats;

    /// Read any number of keys, one physical call per `batch_get` keys.
    async fn batch_get(&self, ctx: &OpContext, keys: &[ItemKey]) -> HubResult<Vec<Record>> {
        let mut found = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(self.limits().batch_get) {
            ctx.check()?;
            found.extend(self.batch_get_chunk(ctx, chunk).await?);
        }
        Ok(found)
    }

    /// Write any number of items, one physical call per `batch_write` ops.
    ///
    /// Chunks are issued in order and every chunk is attempted. A failed
    /// chunk leaves earlier chunks applied; the call then reports
    /// `PartialBatch` naming how many chunks committed. Cancellation stops
    /// before the next chunk.
    async fn batch_write(
        &self,
        ctx: &OpContext,
        puts: Vec<Record>,
        deletes: Vec<ItemKey>,
    ) -> HubResult<()> {
        let ops: Vec<WriteOp> = puts
            .into_iter()
            .map(WriteOp::Put)
            .chain(deletes.into_iter().map(WriteOp::Delete))
            .collect();
        let limit = self.limits().batch_write;
        let total_chunks = ops.len().div_ceil(limit);

        let mut completed_chunks = 0;
        let mut first_failure: Option<HubError> = None;
        for (index, chunk) in ops.chunks(limit).enumerate() {
            ctx.check()?;
            match self.batch_write_chunk(ctx, chunk).await {
                Ok(()) => completed_chunks += 1,
                Err(e @ (HubError::Cancelled | HubError::DeadlineExceeded)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        chunk = index,
                        total_chunks,
                        error = %e,
                        "Batch write chunk failed"
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            None => Ok(()),
            Some(e) => Err(StorageError::PartialBatch {
                completed_chunks,
                total_chunks,
                reason: e.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transact_item_conflicts() {
        let key = ItemKey::new("USER#u1", "METADATA");
        let delete = TransactItem::delete(key.clone());
        assert!(delete.conflict(false).is_some());
        assert!(delete.conflict(true).is_none());

        let put = TransactItem {
            op: WriteOp::Delete(key),
            condition: Condition::None,
        };
        assert!(put.conflict(false).is_none());
    }

    #[test]
    fn test_duplicate_transaction_keys_rejected() {
        let key = ItemKey::new("USER#u1", "METADATA");
        let items = vec![
            TransactItem::delete(key.clone()),
            TransactItem::delete(key),
        ];
        let err = check_distinct_keys(&items).unwrap_err();
        assert!(matches!(
            err,
            HubError::Storage(StorageError::TransactionCanceled { .. })
        ));
    }

    #[test]
    fn test_limits_from_settings() {
        let limits = StoreLimits::default();
        assert_eq!(limits.batch_write, 25);
        assert_eq!(limits.batch_get, 100);
        assert_eq!(limits.transaction, 100);
    }
}
