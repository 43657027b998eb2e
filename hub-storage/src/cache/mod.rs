//! Ephemeral TTL caches holding serialized snapshots of records, record
//! lists and aggregates.
//!
//! The cache is never the source of truth. Callers populate and evict it
//! around store operations and treat any cache fault as a miss.

pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use lmdb_backend::LmdbCache;
pub use memory::MemoryCache;
pub use traits::{Cache, CacheStats};
