use crate::models::Subscription;
use anyhow::Result;
use async_trait::async_trait;

/// Local subscription store.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Persist a new subscription. The flag is the store's own success
    /// indicator and is passed through to the caller.
    async fn store(&self, subscription: Subscription) -> Result<bool>;

    /// Replace the stored subscription with the same `id`.
    async fn update(&self, subscription: Subscription) -> Result<bool>;

    /// Delete by id, returning what was removed.
    async fn remove(&self, id: &str) -> Result<Subscription>;

    async fn find(&self, id: &str) -> Result<Option<Subscription>>;

    /// Every stored subscription, in the store's own order.
    async fn list(&self) -> Result<Vec<Subscription>>;
}
