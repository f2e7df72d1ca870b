//! Subscription orchestration over the repository and the billing provider.
//!
//! Every operation returns immediately with a pending promise. Collaborator
//! calls run as spawned tasks and settle that promise from their
//! continuations.

use crate::config::SubscriptionConfig;
use crate::error::{Collaborator, CollaboratorError, Operation, SubscriptionError};
use crate::models::Subscription;
use crate::services::metrics::{self, MetricsSink};
use crate::services::{BillingProvider, Heartbeat, SubscriptionRepository};
use service_core::promise::{join, join_settled, Deferred, Promise, Resolver};
use futures::FutureExt;
use std::any::Any;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, Instrument};

/// The five subscription operations, each answered with one settle-once
/// promise.
pub trait SubscriptionService: Send + Sync {
    /// Register with billing first, then store the subscription carrying
    /// the billing provider's id.
    ///
    /// `subscription` is taken by value and the caller's copy is never
    /// touched. The stored copy gets `third_party_id`; read it back through
    /// `retrieve` or `list`.
    fn create(&self, subscription: Subscription) -> Promise<bool, SubscriptionError>;

    /// Write the store and billing concurrently. `id` overrides any id in
    /// the body.
    fn update(&self, id: &str, subscription: Subscription) -> Promise<bool, SubscriptionError>;

    /// Delete from the store and billing concurrently.
    fn remove(&self, id: &str) -> Promise<bool, SubscriptionError>;

    fn retrieve(&self, id: &str) -> Promise<Subscription, SubscriptionError>;

    fn list(&self) -> Promise<Vec<Subscription>, SubscriptionError>;
}

/// How every collaborator call is dispatched.
#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    timeout: Option<Duration>,
}

impl CallPolicy {
    /// Defer a collaborator call. Nothing runs until the returned deferred
    /// is invoked. A call that panics rejects like any other failure.
    fn call<T, F>(&self, collaborator: Collaborator, call: F) -> Deferred<T, CollaboratorError>
    where
        T: Clone + Send + 'static,
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let timeout = self.timeout;
        let bounded = async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result.map_err(CollaboratorError::from),
                    Err(_) => Err(CollaboratorError::timed_out(collaborator, limit)),
                },
                None => call.await.map_err(CollaboratorError::from),
            }
        };
        Deferred::new(
            async move {
                match AssertUnwindSafe(bounded).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        let detail = panic_detail(payload.as_ref());
                        tracing::error!(
                            collaborator = %collaborator,
                            "Collaborator call panicked: {}",
                            detail
                        );
                        Err(CollaboratorError::panicked(collaborator, detail))
                    }
                }
            }
            .in_current_span(),
        )
    }
}

pub struct SubscriptionServiceImpl {
    repository: Arc<dyn SubscriptionRepository>,
    billing: Arc<dyn BillingProvider>,
    metrics: Arc<dyn MetricsSink>,
    policy: CallPolicy,
    heartbeat: Option<Heartbeat>,
}

impl SubscriptionServiceImpl {
    /// Build the service. When the heartbeat is enabled this spawns it, so
    /// it must run inside a tokio runtime.
    pub fn new(
        config: &SubscriptionConfig,
        repository: Arc<dyn SubscriptionRepository>,
        billing: Arc<dyn BillingProvider>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let heartbeat = config
            .heartbeat
            .enabled
            .then(|| Heartbeat::start(config.heartbeat.interval, Arc::clone(&metrics)));

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            heartbeat = heartbeat.is_some(),
            collaborator_timeout_ms = config.collaborators.timeout.map(|t| t.as_millis() as u64),
            "Subscription service ready"
        );

        Self {
            repository,
            billing,
            metrics,
            policy: CallPolicy {
                timeout: config.collaborators.timeout,
            },
            heartbeat,
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(Heartbeat::is_running)
    }

    /// Stop background work. Calls already in flight still settle their
    /// promises.
    pub async fn shutdown(&mut self) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.shutdown().await;
        }
        tracing::info!("Subscription service stopped");
    }

    /// Join the store and billing halves of an update or remove.
    ///
    /// The returned promise rejects with the first failure. Both outcomes
    /// are inspected once known, and a write that landed on one side only
    /// is reported under `partial_failure_key`.
    fn dual_write<A, B>(
        &self,
        operation: Operation,
        id: String,
        persistence: Deferred<A, CollaboratorError>,
        billing: Deferred<B, CollaboratorError>,
        partial_failure_key: &'static str,
    ) -> Promise<bool, SubscriptionError>
    where
        A: Clone + Send + 'static,
        B: Clone + Send + 'static,
    {
        let context = |collaborator: Collaborator| {
            let id = id.clone();
            let operation = operation;
            move |source| SubscriptionError::collaborator(collaborator, operation, Some(id), source)
        };
        let persisted = persistence
            .promise()
            .map_err(context(Collaborator::Persistence))
            .catch_error(log_rejection);
        let billed = billing
            .promise()
            .map_err(context(Collaborator::Billing))
            .catch_error(log_rejection);

        let metrics = Arc::clone(&self.metrics);
        let partial_id = id.clone();
        let both = join_settled(persistence.promise().clone(), billing.promise().clone());
        both.on_settled(move |outcome| {
            let outcomes = match outcome {
                Ok(outcomes) => outcomes,
                Err(never) => match never {},
            };
            if let Some(partial) = partial_failure(operation, &partial_id, outcomes) {
                tracing::error!(
                    operation = %operation,
                    subscription_id = %partial_id,
                    cause = %source_of(&partial),
                    "{}",
                    partial
                );
                metrics.increment(partial_failure_key);
            }
        });

        let written = Promise::then(&join(persisted, billed), move |_| {
            tracing::info!(
                operation = %operation,
                subscription_id = %id,
                "Subscription {}d in store and billing",
                operation
            );
            true
        });

        persistence.invoke();
        billing.invoke();
        written
    }
}

impl SubscriptionService for SubscriptionServiceImpl {
    #[instrument(skip_all, fields(operation = "create", plan = %subscription.plan))]
    fn create(&self, subscription: Subscription) -> Promise<bool, SubscriptionError> {
        self.metrics.increment(metrics::CREATE_CALLED);

        let repository = Arc::clone(&self.repository);
        let billing = Arc::clone(&self.billing);
        let policy = self.policy;

        Deferred::from_fn(move |outer: Resolver<bool, SubscriptionError>| {
            let billing_failed = outer.clone();
            let request = subscription.clone();

            policy
                .call(Collaborator::Billing, async move {
                    billing.create(request).await
                })
                .then(move |third_party_id| {
                    tracing::info!(
                        third_party_id = %third_party_id,
                        "Billing subscription created"
                    );
                    let mut subscription = subscription;
                    subscription.third_party_id = Some(third_party_id);
                    store_created(policy, repository, subscription, outer);
                })
                .catch_error(move |source| {
                    reject(
                        &billing_failed,
                        SubscriptionError::collaborator(
                            Collaborator::Billing,
                            Operation::Create,
                            None,
                            source,
                        ),
                    );
                })
                .invoke();
        })
        .invoke()
    }

    #[instrument(skip_all, fields(operation = "update", subscription_id = %id))]
    fn update(&self, id: &str, mut subscription: Subscription) -> Promise<bool, SubscriptionError> {
        self.metrics.increment(metrics::UPDATE_CALLED);
        subscription.id = Some(id.to_string());

        let repository = Arc::clone(&self.repository);
        let billing = Arc::clone(&self.billing);
        let stored = subscription.clone();

        let persistence = self.policy.call(Collaborator::Persistence, async move {
            repository.update(stored).await
        });
        let billing = self.policy.call(Collaborator::Billing, async move {
            billing.update(subscription).await
        });

        self.dual_write(
            Operation::Update,
            id.to_string(),
            persistence,
            billing,
            metrics::UPDATE_PARTIAL_FAILURE,
        )
    }

    #[instrument(skip_all, fields(operation = "remove", subscription_id = %id))]
    fn remove(&self, id: &str) -> Promise<bool, SubscriptionError> {
        self.metrics.increment(metrics::REMOVE_CALLED);

        let repository = Arc::clone(&self.repository);
        let billing = Arc::clone(&self.billing);
        let stored_id = id.to_string();
        let billing_id = id.to_string();

        let persistence = self.policy.call(Collaborator::Persistence, async move {
            repository.remove(&stored_id).await
        });
        let billing = self.policy.call(Collaborator::Billing, async move {
            billing.remove(&billing_id).await
        });

        self.dual_write(
            Operation::Remove,
            id.to_string(),
            persistence,
            billing,
            metrics::REMOVE_PARTIAL_FAILURE,
        )
    }

    #[instrument(skip_all, fields(operation = "retrieve", subscription_id = %id))]
    fn retrieve(&self, id: &str) -> Promise<Subscription, SubscriptionError> {
        self.metrics.increment(metrics::RETRIEVE_CALLED);

        let repository = Arc::clone(&self.repository);
        let lookup_id = id.to_string();
        let failed_id = id.to_string();
        let id = id.to_string();

        let lookup = self.policy.call(Collaborator::Persistence, async move {
            repository.find(&lookup_id).await
        });
        let found = lookup
            .promise()
            .map_err(move |source| {
                SubscriptionError::collaborator(
                    Collaborator::Persistence,
                    Operation::Retrieve,
                    Some(failed_id),
                    source,
                )
            })
            .and_then(move |found| match found {
                Some(subscription) => {
                    tracing::info!(subscription_id = %id, "Subscription retrieved");
                    Promise::resolved(subscription)
                }
                None => Promise::rejected(SubscriptionError::NotFound { id }),
            })
            .catch_error(log_rejection);

        lookup.invoke();
        found
    }

    #[instrument(skip_all, fields(operation = "list"))]
    fn list(&self) -> Promise<Vec<Subscription>, SubscriptionError> {
        self.metrics.increment(metrics::LIST_CALLED);

        let repository = Arc::clone(&self.repository);

        let lookup = self
            .policy
            .call(Collaborator::Persistence, async move { repository.list().await })
            .then(|subscriptions| {
                tracing::info!(count = subscriptions.len(), "Subscriptions listed");
            });
        let listed = lookup
            .promise()
            .map_err(|source| {
                SubscriptionError::collaborator(
                    Collaborator::Persistence,
                    Operation::List,
                    None,
                    source,
                )
            })
            .catch_error(log_rejection);

        lookup.invoke();
        listed
    }
}

/// Second step of create: store the subscription now carrying its billing id.
fn store_created(
    policy: CallPolicy,
    repository: Arc<dyn SubscriptionRepository>,
    subscription: Subscription,
    outer: Resolver<bool, SubscriptionError>,
) {
    let store_failed = outer.clone();
    let third_party_id = subscription.third_party_id.clone().unwrap_or_default();

    policy
        .call(Collaborator::Persistence, async move {
            repository.store(subscription).await
        })
        .then(move |stored| {
            tracing::info!(third_party_id = %third_party_id, stored, "Subscription created");
            deliver(&outer, Operation::Create, Ok(stored));
        })
        .catch_error(move |source| {
            reject(
                &store_failed,
                SubscriptionError::collaborator(
                    Collaborator::Persistence,
                    Operation::Create,
                    None,
                    source,
                ),
            );
        })
        .invoke();
}

fn reject<T>(outer: &Resolver<T, SubscriptionError>, error: SubscriptionError)
where
    T: Clone + Send + 'static,
{
    log_rejection(error.clone());
    deliver(outer, error.operation(), Err(error));
}

/// Settle an outer promise. A second settlement is a bug in the
/// orchestration, never a business outcome, so it is only logged.
fn deliver<T>(
    outer: &Resolver<T, SubscriptionError>,
    operation: Operation,
    outcome: Result<T, SubscriptionError>,
) where
    T: Clone + Send + 'static,
{
    if let Err(source) = outer.settle(outcome) {
        let violation = SubscriptionError::AlreadySettled { operation, source };
        tracing::error!(operation = %operation, "{}", violation);
    }
}

fn log_rejection(error: SubscriptionError) {
    if error.is_not_found() {
        tracing::warn!(operation = %error.operation(), "{}", error);
    } else {
        tracing::error!(
            operation = %error.operation(),
            cause = %source_of(&error),
            "{}",
            error
        );
    }
}

fn source_of(error: &SubscriptionError) -> String {
    error
        .source()
        .map(|source| source.to_string())
        .unwrap_or_default()
}

fn panic_detail(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// The write that landed on one side only, if any.
fn partial_failure<A, B>(
    operation: Operation,
    id: &str,
    outcomes: (Result<A, CollaboratorError>, Result<B, CollaboratorError>),
) -> Option<SubscriptionError> {
    let (failed, source) = match outcomes {
        (Ok(_), Err(source)) => (Collaborator::Billing, source),
        (Err(source), Ok(_)) => (Collaborator::Persistence, source),
        _ => return None,
    };
    Some(SubscriptionError::PartialFailure {
        operation,
        id: id.to_string(),
        failed,
        source,
    })
}
