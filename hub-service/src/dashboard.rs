//! Per-user dashboard aggregate
//!
//! One partition query returns the user row followed by every row stored
//! under it; the rows are split by entity type. The raw partition is cached
//! under `user:dashboard:<id>` with the aggregate TTL and dropped by every
//! user or contact write in that partition.

use hub_core::validation::validate_identifier;
use hub_core::{
    partition_key, CacheKey, Contact, Entity, EntityType, HubResult, OpContext, Record,
    StorageError, User, METADATA_SORT_KEY,
};
use hub_storage::{Cache, DurableStore};
use serde::{Deserialize, Serialize};

use crate::coordinator::CacheAsideCoordinator;

/// A user together with the contacts stored in their partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDashboard {
    pub user: User,
    pub contacts: Vec<Contact>,
}

impl UserDashboard {
    /// Split the rows of one user partition. `NotFound` when the user row
    /// itself is absent, even if orphaned children remain.
    pub fn from_partition(pk: &str, records: &[Record]) -> HubResult<Self> {
        let user_row = records
            .iter()
            .find(|r| r.entity_type == EntityType::User && r.sk == METADATA_SORT_KEY)
            .ok_or_else(|| StorageError::NotFound {
                pk: pk.to_string(),
                sk: METADATA_SORT_KEY.to_string(),
            })?;
        let user = User::from_record(user_row)?;
        let contacts = records
            .iter()
            .filter(|r| r.entity_type == EntityType::Contact)
            .map(Contact::from_record)
            .collect::<HubResult<Vec<_>>>()?;
        Ok(Self { user, contacts })
    }

    pub fn favorites(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter().filter(|c| c.is_favorite)
    }
}

impl<S: DurableStore, C: Cache> CacheAsideCoordinator<S, C> {
    /// Read-through dashboard for `user_id`.
    pub async fn dashboard(&self, ctx: &OpContext, user_id: &str) -> HubResult<UserDashboard> {
        validate_identifier("user_id", user_id)?;
        let ctx = ctx.or_timeout(self.config().operation_timeout);
        let pk = partition_key(EntityType::User, user_id);
        let key = CacheKey::dashboard(user_id);

        let records: Vec<Record> = self
            .read_through(&ctx, &key, self.config().cache.aggregate_ttl, || async {
                let rows = ctx.run(self.store().query(&ctx, &pk, "")).await?;
                // Check before the rows can be cached: a missing user is
                // never backfilled.
                UserDashboard::from_partition(&pk, &rows)?;
                Ok(rows)
            })
            .await?;
        UserDashboard::from_partition(&pk, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Vec<Record> {
        let user = User::new("ada@example.com", "Ada", "Lovelace").with_id("u1");
        let c1 = Contact::new("u1", "Babbage", "cb@example.com")
            .with_id("c1")
            .with_favorite(true);
        let c2 = Contact::new("u1", "Somerville", "ms@example.com").with_id("c2");
        vec![c1.to_record(), c2.to_record(), user.to_record()]
    }

    #[test]
    fn test_from_partition_splits_by_type() {
        let dashboard = UserDashboard::from_partition("USER#u1", &partition()).unwrap();
        assert_eq!(dashboard.user.id, "u1");
        assert_eq!(dashboard.contacts.len(), 2);
        let favorites: Vec<_> = dashboard.favorites().map(|c| c.id.as_str()).collect();
        assert_eq!(favorites, vec!["c1"]);
    }

    #[test]
    fn test_orphaned_children_are_not_a_dashboard() {
        let mut rows = partition();
        rows.retain(|r| r.entity_type != EntityType::User);
        let err = UserDashboard::from_partition("USER#u1", &rows).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_contact_row_is_reported() {
        let mut rows = partition();
        rows[0].attributes.remove("email");
        let err = UserDashboard::from_partition("USER#u1", &rows).unwrap_err();
        assert!(matches!(
            err,
            hub_core::HubError::Storage(StorageError::Serialization { .. })
        ));
    }
}
