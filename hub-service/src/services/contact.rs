//! Contact Service

use hub_core::{AttributeMap, Contact, HubResult, Identity, ListFilter, OpContext, User};
use hub_storage::{Cache, DurableStore};
use serde_json::Value;

use crate::coordinator::CacheAsideCoordinator;

/// Contact operations. Every contact lives in its owning user's partition.
#[derive(Debug)]
pub struct ContactService<S, C> {
    coordinator: CacheAsideCoordinator<S, C>,
}

impl<S, C> Clone for ContactService<S, C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: DurableStore, C: Cache> ContactService<S, C> {
    pub fn new(coordinator: CacheAsideCoordinator<S, C>) -> Self {
        Self { coordinator }
    }

    /// Create a contact under an existing user.
    ///
    /// # Errors
    /// `NotFound` when the owning user does not exist, `AlreadyExists` when
    /// the contact id is taken in that user's partition.
    pub async fn create(&self, ctx: &OpContext, contact: &Contact) -> HubResult<Contact> {
        self.coordinator
            .get::<User>(ctx, &Identity::standalone(contact.user_id.as_str()))
            .await?;
        self.coordinator.create(ctx, contact).await
    }

    pub async fn get(&self, ctx: &OpContext, user_id: &str, id: &str) -> HubResult<Contact> {
        self.coordinator
            .get(ctx, &Identity::owned(user_id, id))
            .await
    }

    pub async fn update(
        &self,
        ctx: &OpContext,
        user_id: &str,
        id: &str,
        changes: &AttributeMap,
    ) -> HubResult<Contact> {
        self.coordinator
            .update(ctx, &Identity::owned(user_id, id), changes)
            .await
    }

    pub async fn set_favorite(
        &self,
        ctx: &OpContext,
        user_id: &str,
        id: &str,
        is_favorite: bool,
    ) -> HubResult<Contact> {
        let mut changes = AttributeMap::new();
        changes.insert("is_favorite".to_string(), Value::Bool(is_favorite));
        self.update(ctx, user_id, id, &changes).await
    }

    pub async fn delete(&self, ctx: &OpContext, user_id: &str, id: &str) -> HubResult<Contact> {
        self.coordinator
            .delete(ctx, &Identity::owned(user_id, id))
            .await
    }

    /// Every contact of every user.
    pub async fn list(&self, ctx: &OpContext) -> HubResult<Vec<Contact>> {
        self.coordinator.list(ctx).await
    }

    pub async fn list_for_user(&self, ctx: &OpContext, user_id: &str) -> HubResult<Vec<Contact>> {
        self.coordinator.list_by_relation(ctx, user_id).await
    }

    pub async fn list_filtered(
        &self,
        ctx: &OpContext,
        user_id: &str,
        filter: ListFilter,
    ) -> HubResult<Vec<Contact>> {
        self.coordinator.list_filtered(ctx, user_id, filter).await
    }

    pub async fn favorites(&self, ctx: &OpContext, user_id: &str) -> HubResult<Vec<Contact>> {
        self.list_filtered(ctx, user_id, ListFilter::Favorites)
            .await
    }
}
