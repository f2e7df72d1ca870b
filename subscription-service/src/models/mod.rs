//! Domain models for subscription-service.

mod subscription;

pub use subscription::Subscription;
