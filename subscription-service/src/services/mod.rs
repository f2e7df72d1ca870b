//! Services module for subscription-service.

pub mod billing;
pub mod heartbeat;
pub mod metrics;
pub mod repository;

pub use billing::BillingProvider;
pub use heartbeat::Heartbeat;
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use repository::SubscriptionRepository;
