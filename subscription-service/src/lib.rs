//! subscription-service: keeps a subscription store and a third-party billing
//! provider in step, exposing every operation as a settle-once promise.

pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod services;

pub use error::SubscriptionError;
pub use service::{SubscriptionService, SubscriptionServiceImpl};
