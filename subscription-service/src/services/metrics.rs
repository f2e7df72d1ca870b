//! Metrics module for subscription-service.
//! Counts operation calls, partial failures and heartbeats by key.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use service_core::error::AppError;

pub const CREATE_CALLED: &str = "subscription.create.called";
pub const UPDATE_CALLED: &str = "subscription.update.called";
pub const REMOVE_CALLED: &str = "subscription.remove.called";
pub const RETRIEVE_CALLED: &str = "subscription.retrieve.called";
pub const LIST_CALLED: &str = "subscription.list.called";

pub const UPDATE_PARTIAL_FAILURE: &str = "subscription.update.partial_failure";
pub const REMOVE_PARTIAL_FAILURE: &str = "subscription.remove.partial_failure";

/// Liveness counter bumped by the heartbeat task.
pub const HEARTBEAT: &str = "i.am.alive";

/// Fire-and-forget counter sink.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, key: &str);
}

/// Prometheus-backed sink with its own registry, so several services (or
/// tests) in one process never collide on collector names.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    events: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, AppError> {
        let events = IntCounterVec::new(
            Opts::new(
                "subscription_events_total",
                "Subscription service events by metric key",
            ),
            &["key"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create event counter: {}", e))?;

        let registry = Registry::new();
        registry
            .register(Box::new(events.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register event counter: {}", e))?;

        Ok(Self { registry, events })
    }

    /// Current value of the counter for `key`.
    pub fn count(&self, key: &str) -> u64 {
        self.events.with_label_values(&[key]).get()
    }

    /// Get metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, AppError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Metrics are not UTF-8: {}", e)))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, key: &str) {
        self.events.with_label_values(&[key]).inc();
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _key: &str) {}
}
