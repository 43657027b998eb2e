//! User Service

use hub_core::{AttributeMap, HubResult, Identity, OpContext, User};
use hub_storage::{Cache, DurableStore};

use crate::coordinator::CacheAsideCoordinator;
use crate::dashboard::UserDashboard;

/// User operations.
#[derive(Debug)]
pub struct UserService<S, C> {
    coordinator: CacheAsideCoordinator<S, C>,
}

impl<S, C> Clone for UserService<S, C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: DurableStore, C: Cache> UserService<S, C> {
    pub fn new(coordinator: CacheAsideCoordinator<S, C>) -> Self {
        Self { coordinator }
    }

    /// Register a user with a fresh id.
    pub async fn register(
        &self,
        ctx: &OpContext,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> HubResult<User> {
        self.create(ctx, &User::new(email, first_name, last_name))
            .await
    }

    pub async fn create(&self, ctx: &OpContext, user: &User) -> HubResult<User> {
        self.coordinator.create(ctx, user).await
    }

    pub async fn get(&self, ctx: &OpContext, id: &str) -> HubResult<User> {
        self.coordinator.get(ctx, &Identity::standalone(id)).await
    }

    pub async fn update(
        &self,
        ctx: &OpContext,
        id: &str,
        changes: &AttributeMap,
    ) -> HubResult<User> {
        self.coordinator
            .update(ctx, &Identity::standalone(id), changes)
            .await
    }

    /// Delete a user. What happens to their contacts depends on the
    /// configured delete policy.
    pub async fn delete(&self, ctx: &OpContext, id: &str) -> HubResult<User> {
        self.coordinator
            .delete(ctx, &Identity::standalone(id))
            .await
    }

    pub async fn list(&self, ctx: &OpContext) -> HubResult<Vec<User>> {
        self.coordinator.list(ctx).await
    }

    pub async fn dashboard(&self, ctx: &OpContext, id: &str) -> HubResult<UserDashboard> {
        self.coordinator.dashboard(ctx, id).await
    }
}
