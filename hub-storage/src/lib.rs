//! HUB Storage - Durable Store and Cache Backends
//!
//! Defines the [`DurableStore`] and [`Cache`] abstractions the coordinator
//! is written against, with in-memory and LMDB implementations of each.

pub mod cache;
pub mod store;

pub use cache::{Cache, CacheStats, LmdbCache, MemoryCache};
pub use store::{
    Condition, DurableStore, LmdbStore, MemoryStore, StoreLimits, StoreStats, TransactItem,
    WriteOp,
};
