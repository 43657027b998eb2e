//! HUB Core - Table Types
//!
//! Records, composite keys, cache keys, filter predicates, entity kinds,
//! configuration and the error taxonomy shared by every hub crate.
//! No I/O happens in this crate.

pub mod config;
pub mod context;
pub mod entities;
pub mod enums;
pub mod error;
pub mod filter;
pub mod identity;
pub mod keys;
pub mod record;
pub mod validation;

pub use config::{CacheSettings, DeletePolicy, HubConfig, StoreSettings};
pub use context::{CancelHandle, OpContext};
pub use entities::{Contact, Entity, User, IMMUTABLE_ATTRIBUTES};
pub use enums::EntityType;
pub use error::{
    CacheError, ConfigError, HubError, HubResult, StorageError, ValidationError,
};
pub use filter::{FilterExpr, FilterOperator, ListFilter, Predicate};
pub use identity::{new_entity_id, Identity, Timestamp};
pub use keys::{
    encode, partition_key, sort_key_prefix, tagged, CacheKey, ItemKey, KeySet, ListScope,
    METADATA_SORT_KEY,
};
pub use record::{next_update_timestamp, AttributeMap, Record, RESERVED_ATTRIBUTES};
pub use validation::AttributeKind;
