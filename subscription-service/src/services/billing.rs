use crate::models::Subscription;
use anyhow::Result;
use async_trait::async_trait;

/// Third-party billing provider (Stripe or similar).
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Register the subscription with the provider and return the
    /// provider's id for it.
    async fn create(&self, subscription: Subscription) -> Result<String>;

    async fn update(&self, subscription: Subscription) -> Result<Subscription>;

    async fn remove(&self, id: &str) -> Result<Subscription>;
}
