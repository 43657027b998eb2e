//! Composite key encoding for the single-table layout.
//!
//! Every row is addressed by a partition key and a sort key. Standalone
//! entities own a partition (`USER#<id>` / `METADATA`); owned entities share
//! their owner's partition and prefix the sort key with their own tag
//! (`USER#<owner>` / `CONTACT#<id>`), so one range query returns a parent and
//! its children in sort-key order.
//!
//! The secondary index pair (`gsi1_pk`, `gsi1_sk`) groups rows by entity
//! type for type-wide scans.
//!
//! Encoding is a pure function of its inputs and never touches the store.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{EntityType, Identity, ListFilter};

/// Separator between a tag and an identifier inside a key.
pub const KEY_SEPARATOR: char = '#';

/// Sort key of the row describing a standalone entity itself.
pub const METADATA_SORT_KEY: &str = "METADATA";

/// Separator between cache key segments.
pub const CACHE_KEY_SEPARATOR: char = ':';

/// Primary key of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// All four key fields derived for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySet {
    pub pk: String,
    pub sk: String,
    pub gsi1_pk: String,
    pub gsi1_sk: String,
}

impl KeySet {
    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.pk.clone(), self.sk.clone())
    }
}

/// `<TAG>#<id>`
pub fn tagged(entity_type: EntityType, id: &str) -> String {
    format!("{}{}{}", entity_type.tag(), KEY_SEPARATOR, id)
}

/// Partition key of a standalone entity, or of the partition an owner
/// shares with its children.
pub fn partition_key(entity_type: EntityType, id: &str) -> String {
    tagged(entity_type, id)
}

/// Sort-key prefix selecting all rows of one owned entity type.
pub fn sort_key_prefix(entity_type: EntityType) -> String {
    format!("{}{}", entity_type.tag(), KEY_SEPARATOR)
}

/// Derive the keys for an entity.
///
/// Owned entity types use the owner's partition when `identity` names an
/// owner. Without an owner they fall back to the standalone layout; callers
/// reject such identities upstream (see [`crate::validation`]).
pub fn encode(entity_type: EntityType, identity: &Identity) -> KeySet {
    let (pk, sk) = match (entity_type.owner(), identity.owner()) {
        (Some(owner_type), Some(owner_id)) => (
            partition_key(owner_type, owner_id),
            tagged(entity_type, &identity.id),
        ),
        _ => (
            partition_key(entity_type, &identity.id),
            METADATA_SORT_KEY.to_string(),
        ),
    };

    KeySet {
        pk,
        sk,
        gsi1_pk: entity_type.tag().to_string(),
        gsi1_sk: tagged(entity_type, &identity.id),
    }
}

/// Which slice of an entity type a cached list holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListScope {
    /// Every entity of the type (type index scan).
    All,
    /// Entities under one owner's partition.
    Owner(String),
    /// Entities under one owner's partition matching a named filter.
    Filtered { owner_id: String, filter: ListFilter },
}

/// Cache key for a point entry, a list entry or an aggregate.
///
/// Rendered forms:
/// - `<type>:<id>` / `<type>:<owner>:<id>`
/// - `<type>:list`, `<type>:list:<owner>`, `<type>:list:<owner>:<filter>`
/// - `user:dashboard:<user>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Entity {
        entity_type: EntityType,
        identity: Identity,
    },
    List {
        entity_type: EntityType,
        scope: ListScope,
    },
    Dashboard {
        user_id: String,
    },
}

impl CacheKey {
    pub fn entity(entity_type: EntityType, identity: Identity) -> Self {
        CacheKey::Entity {
            entity_type,
            identity,
        }
    }

    pub fn list_all(entity_type: EntityType) -> Self {
        CacheKey::List {
            entity_type,
            scope: ListScope::All,
        }
    }

    pub fn list_owned(entity_type: EntityType, owner_id: impl Into<String>) -> Self {
        CacheKey::List {
            entity_type,
            scope: ListScope::Owner(owner_id.into()),
        }
    }

    pub fn list_filtered(
        entity_type: EntityType,
        owner_id: impl Into<String>,
        filter: ListFilter,
    ) -> Self {
        CacheKey::List {
            entity_type,
            scope: ListScope::Filtered {
                owner_id: owner_id.into(),
                filter,
            },
        }
    }

    pub fn dashboard(user_id: impl Into<String>) -> Self {
        CacheKey::Dashboard {
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = CACHE_KEY_SEPARATOR;
        match self {
            CacheKey::Entity {
                entity_type,
                identity,
            } => match identity.owner() {
                Some(owner) => write!(
                    f,
                    "{}{sep}{}{sep}{}",
                    entity_type.cache_namespace(),
                    owner,
                    identity.id
                ),
                None => write!(f, "{}{sep}{}", entity_type.cache_namespace(), identity.id),
            },
            CacheKey::List { entity_type, scope } => {
                write!(f, "{}{sep}list", entity_type.cache_namespace())?;
                match scope {
                    ListScope::All => Ok(()),
                    ListScope::Owner(owner) => write!(f, "{sep}{}", owner),
                    ListScope::Filtered { owner_id, filter } => {
                        write!(f, "{sep}{}{sep}{}", owner_id, filter.name())
                    }
                }
            }
            CacheKey::Dashboard { user_id } => write!(
                f,
                "{}{sep}dashboard{sep}{}",
                EntityType::User.cache_namespace(),
                user_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_keys() {
        let keys = encode(EntityType::User, &Identity::standalone("123"));
        assert_eq!(keys.pk, "USER#123");
        assert_eq!(keys.sk, "METADATA");
        assert_eq!(keys.gsi1_pk, "USER");
        assert_eq!(keys.gsi1_sk, "USER#123");
    }

    #[test]
    fn test_owned_keys_share_owner_partition() {
        let user = encode(EntityType::User, &Identity::standalone("123"));
        let contact = encode(EntityType::Contact, &Identity::owned("123", "456"));
        assert_eq!(contact.pk, user.pk);
        assert_eq!(contact.sk, "CONTACT#456");
        assert_eq!(contact.gsi1_pk, "CONTACT");
        assert_eq!(contact.gsi1_sk, "CONTACT#456");
        assert!(contact.sk.starts_with(&sort_key_prefix(EntityType::Contact)));
    }

    #[test]
    fn test_cache_key_rendering() {
        assert_eq!(
            CacheKey::entity(EntityType::User, Identity::standalone("u1")).to_string(),
            "user:u1"
        );
        assert_eq!(
            CacheKey::entity(EntityType::Contact, Identity::owned("u1", "c1")).to_string(),
            "contact:u1:c1"
        );
        assert_eq!(CacheKey::list_all(EntityType::User).to_string(), "user:list");
        assert_eq!(
            CacheKey::list_owned(EntityType::Contact, "u1").to_string(),
            "contact:list:u1"
        );
        assert_eq!(
            CacheKey::list_filtered(EntityType::Contact, "u1", ListFilter::Favorites).to_string(),
            "contact:list:u1:favorites"
        );
        assert_eq!(CacheKey::dashboard("u1").to_string(), "user:dashboard:u1");
    }
}
