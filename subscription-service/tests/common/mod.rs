//! Common test utilities for subscription-service integration tests.
//!
//! In-memory collaborators with call counters, per-call failure switches and
//! per-call delays, plus a `TestApp` wiring them into the service.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use subscription_service::config::SubscriptionConfig;
use subscription_service::models::Subscription;
use subscription_service::services::{BillingProvider, PrometheusMetrics, SubscriptionRepository};
use subscription_service::SubscriptionServiceImpl;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,subscription_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Call bookkeeping shared by the fakes.
#[derive(Default)]
pub struct Script {
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    panicking: Mutex<HashSet<&'static str>>,
}

impl Script {
    pub fn fail_on(&self, call: &'static str) {
        self.failing.lock().unwrap().insert(call);
    }

    pub fn panic_on(&self, call: &'static str) {
        self.panicking.lock().unwrap().insert(call);
    }

    pub fn delay(&self, call: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(call, delay);
    }

    pub fn calls(&self, call: &'static str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }

    /// Record the call, wait out its delay, then panic or fail if it is
    /// switched to do so.
    async fn enter(&self, call: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(call).or_insert(0) += 1;

        let delay = self.delays.lock().unwrap().get(call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let panics = self.panicking.lock().unwrap().contains(call);
        if panics {
            panic!("{} exploded", call);
        }

        if self.failing.lock().unwrap().contains(call) {
            bail!("{} unavailable", call);
        }
        Ok(())
    }
}

/// Ordered in-memory store.
#[derive(Default)]
pub struct InMemoryRepository {
    pub script: Script,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InMemoryRepository {
    pub fn with_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        Self {
            script: Script::default(),
            subscriptions: Mutex::new(subscriptions),
        }
    }

    pub fn stored(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id.as_deref() == Some(id))
            .cloned()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn store(&self, subscription: Subscription) -> Result<bool> {
        self.script.enter("store").await?;
        self.subscriptions.lock().unwrap().push(subscription);
        Ok(true)
    }

    async fn update(&self, subscription: Subscription) -> Result<bool> {
        self.script.enter("update").await?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.iter_mut().find(|s| s.id == subscription.id) {
            Some(existing) => {
                *existing = subscription;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> Result<Subscription> {
        self.script.enter("remove").await?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        match subscriptions.iter().position(|s| s.id.as_deref() == Some(id)) {
            Some(index) => Ok(subscriptions.remove(index)),
            None => bail!("no subscription with id={}", id),
        }
    }

    async fn find(&self, id: &str) -> Result<Option<Subscription>> {
        self.script.enter("find").await?;
        Ok(self.get(id))
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        self.script.enter("list").await?;
        Ok(self.stored())
    }
}

/// Billing provider that hands out a fixed external id and records every
/// request it receives.
pub struct ScriptedBilling {
    pub script: Script,
    external_id: String,
    updated: Mutex<Vec<Subscription>>,
    removed: Mutex<Vec<String>>,
}

impl ScriptedBilling {
    pub fn new(external_id: &str) -> Self {
        Self {
            script: Script::default(),
            external_id: external_id.to_string(),
            updated: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn updated(&self) -> Vec<Subscription> {
        self.updated.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingProvider for ScriptedBilling {
    async fn create(&self, _subscription: Subscription) -> Result<String> {
        self.script.enter("create").await?;
        Ok(self.external_id.clone())
    }

    async fn update(&self, subscription: Subscription) -> Result<Subscription> {
        self.script.enter("update").await?;
        self.updated.lock().unwrap().push(subscription.clone());
        Ok(subscription)
    }

    async fn remove(&self, id: &str) -> Result<Subscription> {
        self.script.enter("remove").await?;
        self.removed.lock().unwrap().push(id.to_string());
        Ok(Subscription::new("cancelled").with_id(id))
    }
}

/// Service wired to in-memory collaborators.
pub struct TestApp {
    pub service: SubscriptionServiceImpl,
    pub repository: Arc<InMemoryRepository>,
    pub billing: Arc<ScriptedBilling>,
    pub metrics: Arc<PrometheusMetrics>,
}

impl TestApp {
    /// Spawn with an empty store and the heartbeat disabled.
    pub fn spawn() -> Self {
        Self::spawn_with(test_config(), InMemoryRepository::default())
    }

    pub fn spawn_with_store(subscriptions: Vec<Subscription>) -> Self {
        Self::spawn_with(
            test_config(),
            InMemoryRepository::with_subscriptions(subscriptions),
        )
    }

    pub fn spawn_with(config: SubscriptionConfig, repository: InMemoryRepository) -> Self {
        init_tracing();

        let repository = Arc::new(repository);
        let billing = Arc::new(ScriptedBilling::new("sub_123"));
        let metrics = Arc::new(PrometheusMetrics::new().expect("Failed to create metrics"));

        let service = SubscriptionServiceImpl::new(
            &config,
            repository.clone(),
            billing.clone(),
            metrics.clone(),
        );

        Self {
            service,
            repository,
            billing,
            metrics,
        }
    }
}

pub fn test_config() -> SubscriptionConfig {
    let mut config = SubscriptionConfig::default();
    config.service_name = "subscription-service-test".to_string();
    config.heartbeat.enabled = false;
    config
}

/// Poll `condition` until it holds, failing the test after one second.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 1s");
}
