//! LMDB-backed durable table.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a crash-safe,
//! memory-mapped table. Two named databases live in one environment:
//!
//! - `<table>.records`: `pk \0 sk` -> JSON-encoded [`Record`]
//! - `<table>.gsi1`: `gsi1_pk \0 gsi1_sk \0 pk \0 sk` -> `pk \0 sk`
//!
//! Identifiers never contain control characters, so the NUL separator keeps
//! a partition's rows contiguous and ordered by sort key.
//!
//! # Atomicity
//!
//! Every mutating call, including a whole batch chunk or transaction, runs in
//! one LMDB write transaction. LMDB serializes writers, so the existence check
//! of a conditional write and the write itself cannot interleave with another
//! writer.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use hub_core::{
    AttributeMap, EntityType, HubResult, ItemKey, OpContext, Predicate, Record, StorageError,
    StoreSettings,
};

use super::{
    check_distinct_keys, DurableStore, StoreCounters, StoreLimits, StoreStats, TransactItem,
    WriteOp,
};

const SEP: u8 = 0;

fn backend(e: heed::Error) -> StorageError {
    StorageError::Backend {
        reason: e.to_string(),
    }
}

fn not_found(key: &ItemKey) -> StorageError {
    StorageError::NotFound {
        pk: key.pk.clone(),
        sk: key.sk.clone(),
    }
}

fn join(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.extend_from_slice(part.as_bytes());
    }
    out
}

fn record_key(key: &ItemKey) -> Vec<u8> {
    join(&[&key.pk, &key.sk])
}

fn index_key(record: &Record) -> Vec<u8> {
    join(&[&record.gsi1_pk, &record.gsi1_sk, &record.pk, &record.sk])
}

fn encode_record(record: &Record) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(|e| StorageError::Serialization {
        reason: e.to_string(),
    })
}

fn decode_record(bytes: &[u8]) -> Result<Record, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
        reason: e.to_string(),
    })
}

/// [`DurableStore`] persisted in an LMDB environment.
pub struct LmdbStore {
    env: Env,
    records: Database<Bytes, Bytes>,
    gsi1: Database<Bytes, Bytes>,
    limits: StoreLimits,
    counters: StoreCounters,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .field("limits", &self.limits)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl LmdbStore {
    /// Open (or create) the table named in `settings` under `path`.
    pub fn open<P: AsRef<Path>>(path: P, settings: &StoreSettings) -> HubResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| StorageError::Backend {
            reason: format!("create {}: {}", path.as_ref().display(), e),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(settings.map_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(backend)?;

        let mut wtxn = env.write_txn().map_err(backend)?;
        let records: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(&format!("{}.records", settings.table_name)))
            .map_err(backend)?;
        let gsi1: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(&format!("{}.gsi1", settings.table_name)))
            .map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        tracing::info!(
            path = %path.as_ref().display(),
            table = %settings.table_name,
            "Opened LMDB store"
        );

        Ok(Self {
            env,
            records,
            gsi1,
            limits: StoreLimits::from(settings),
            counters: StoreCounters::default(),
        })
    }

    fn load(&self, txn: &RoTxn<'_>, key: &ItemKey) -> Result<Option<Record>, StorageError> {
        match self.records.get(txn, &record_key(key)).map_err(backend)? {
            Some(bytes) => decode_record(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn store(&self, wtxn: &mut RwTxn<'_>, record: &Record) -> Result<(), StorageError> {
        if let Some(old) = self.load(wtxn, &record.key())? {
            self.gsi1.delete(wtxn, &index_key(&old)).map_err(backend)?;
        }
        let primary = record_key(&record.key());
        self.records
            .put(wtxn, &primary, &encode_record(record)?)
            .map_err(backend)?;
        self.gsi1
            .put(wtxn, &index_key(record), &primary)
            .map_err(backend)?;
        Ok(())
    }

    fn remove(&self, wtxn: &mut RwTxn<'_>, key: &ItemKey) -> Result<Option<Record>, StorageError> {
        let Some(old) = self.load(wtxn, key)? else {
            return Ok(None);
        };
        self.records
            .delete(wtxn, &record_key(key))
            .map_err(backend)?;
        self.gsi1.delete(wtxn, &index_key(&old)).map_err(backend)?;
        Ok(Some(old))
    }

    fn apply(&self, wtxn: &mut RwTxn<'_>, op: &WriteOp) -> Result<(), StorageError> {
        match op {
            WriteOp::Put(record) => self.store(wtxn, record),
            WriteOp::Delete(key) => self.remove(wtxn, key).map(|_| ()),
        }
    }

    /// Run `f` in a write transaction, committing only when it succeeds.
    fn write<T, F>(&self, f: F) -> HubResult<T>
    where
        F: FnOnce(&mut RwTxn<'_>) -> HubResult<T>,
    {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        match f(&mut wtxn) {
            Ok(value) => {
                wtxn.commit().map_err(backend)?;
                Ok(value)
            }
            Err(e) => {
                wtxn.abort();
                Err(e)
            }
        }
    }

    fn scan(
        &self,
        pk: &str,
        sk_prefix: &str,
        predicate: Option<&Predicate>,
    ) -> HubResult<Vec<Record>> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        let mut prefix = join(&[pk, ""]);
        prefix.extend_from_slice(sk_prefix.as_bytes());

        let mut rows = Vec::new();
        for entry in self.records.prefix_iter(&rtxn, &prefix).map_err(backend)? {
            let (_, bytes) = entry.map_err(backend)?;
            let record = decode_record(bytes)?;
            if predicate.map_or(true, |p| p.matches(&record)) {
                rows.push(record);
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl DurableStore for LmdbStore {
    async fn put(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        ctx.check()?;
        self.write(|wtxn| Ok(self.store(wtxn, &record)?))
    }

    async fn put_if_absent(&self, ctx: &OpContext, record: Record) -> HubResult<()> {
        ctx.check()?;
        self.write(|wtxn| {
            if self.load(wtxn, &record.key())?.is_some() {
                return Err(StorageError::AlreadyExists {
                    pk: record.pk.clone(),
                    sk: record.sk.clone(),
                }
                .into());
            }
            Ok(self.store(wtxn, &record)?)
        })
    }

    async fn get(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        ctx.check()?;
        let rtxn = self.env.read_txn().map_err(backend)?;
        self.load(&rtxn, key)?.ok_or_else(|| not_found(key).into())
    }

    async fn update(
        &self,
        ctx: &OpContext,
        key: &ItemKey,
        changes: &AttributeMap,
    ) -> HubResult<Record> {
        ctx.check()?;
        self.write(|wtxn| {
            let mut record = self.load(wtxn, key)?.ok_or_else(|| not_found(key))?;
            record.apply_changes(changes, Utc::now());
            self.store(wtxn, &record)?;
            Ok(record)
        })
    }

    async fn delete(&self, ctx: &OpContext, key: &ItemKey) -> HubResult<Record> {
        ctx.check()?;
        self.write(|wtxn| Ok(self.remove(wtxn, key)?.ok_or_else(|| not_found(key))?))
    }

    async fn query(&self, ctx: &OpContext, pk: &str, sk_prefix: &str) -> HubResult<Vec<Record>> {
        ctx.check()?;
        self.scan(pk, sk_prefix, None)
    }

    async fn query_by_type(
        &self,
        ctx: &OpContext,
        entity_type: EntityType,
    ) -> HubResult<Vec<Record>> {
        ctx.check()?;
        let rtxn = self.env.read_txn().map_err(backend)?;
        let prefix = join(&[entity_type.tag(), ""]);

        let mut rows = Vec::new();
        for entry in self.gsi1.prefix_iter(&rtxn, &prefix).map_err(backend)? {
            let (_, primary) = entry.map_err(backend)?;
            if let Some(bytes) = self.records.get(&rtxn, primary).map_err(backend)? {
                rows.push(decode_record(bytes)?);
            }
        }
        Ok(rows)
    }

    async fn query_with_filter(
        &self,
        ctx: &OpContext,
        pk: &str,
        sk_prefix: &str,
        predicate: &Predicate,
    ) -> HubResult<Vec<Record>> {
        ctx.check()?;
        self.scan(pk, sk_prefix, Some(predicate))
    }

    async fn batch_get_chunk(&self, ctx: &OpContext, keys: &[ItemKey]) -> HubResult<Vec<Record>> {
        ctx.check()?;
        self.counters.batch_get();
        let rtxn = self.env.read_txn().map_err(backend)?;
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.load(&rtxn, key)? {
                found.push(record);
            }
        }
        Ok(found)
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
        self.write(|wtxn| {
            for op in ops {
                self.apply(wtxn, op)?;
            }
            Ok(())
        })
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

        self.write(|wtxn| {
            for item in &items {
                let exists = self.load(wtxn, &item.key())?.is_some();
                if let Some(reason) = item.conflict(exists) {
                    return Err(StorageError::TransactionCanceled { reason }.into());
                }
            }
            for item in &items {
                self.apply(wtxn, &item.op)?;
            }
            Ok(())
        })
    }

    fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}
