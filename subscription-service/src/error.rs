//! Error taxonomy for subscription operations.
//!
//! Every rejection names the operation it came from and, where one exists,
//! the subscription id. Errors are `Clone` because a settled promise hands
//! the same outcome to every continuation.

use service_core::promise::SettleError;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Remove,
    Retrieve,
    List,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Remove => "remove",
            Operation::Retrieve => "retrieve",
            Operation::List => "list",
        }
    }

    /// Verb used in rejection messages.
    fn verb(&self) -> &'static str {
        match self {
            Operation::Retrieve => "find",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend a failed call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collaborator {
    Billing,
    Persistence,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collaborator::Billing => "billing",
            Collaborator::Persistence => "persistence",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shareable wrapper around a collaborator's `anyhow::Error`.
///
/// Displays the whole context chain on one line and reports no `source`,
/// so walking the error chain never repeats a cause.
#[derive(Debug, Clone)]
pub struct CollaboratorError(Arc<anyhow::Error>);

impl CollaboratorError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn timed_out(collaborator: Collaborator, limit: Duration) -> Self {
        Self::new(anyhow::anyhow!(
            "{} call timed out after {}ms",
            collaborator,
            limit.as_millis()
        ))
    }

    pub fn panicked(collaborator: Collaborator, detail: &str) -> Self {
        Self::new(anyhow::anyhow!("{} call panicked: {}", collaborator, detail))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl StdError for CollaboratorError {}

impl From<anyhow::Error> for CollaboratorError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error("{}", describe(.operation, Collaborator::Billing, .id))]
    BillingFailure {
        operation: Operation,
        id: Option<String>,
        #[source]
        source: CollaboratorError,
    },

    #[error("{}", describe(.operation, Collaborator::Persistence, .id))]
    PersistenceFailure {
        operation: Operation,
        id: Option<String>,
        #[source]
        source: CollaboratorError,
    },

    #[error("Subscription with id={id} not found")]
    NotFound { id: String },

    #[error("Partial {operation} of subscription with id={id}: {failed} failed, the other side was applied")]
    PartialFailure {
        operation: Operation,
        id: String,
        failed: Collaborator,
        #[source]
        source: CollaboratorError,
    },

    #[error("Outcome of {operation} was delivered twice")]
    AlreadySettled {
        operation: Operation,
        #[source]
        source: SettleError,
    },
}

fn describe(operation: &Operation, collaborator: Collaborator, id: &Option<String>) -> String {
    if *operation == Operation::List {
        return "Unable to list subscriptions".to_string();
    }
    let subject = match collaborator {
        Collaborator::Billing => "billing subscription",
        Collaborator::Persistence => "subscription",
    };
    match id {
        Some(id) => format!("Unable to {} {} with id={}", operation.verb(), subject, id),
        None => format!("Unable to {} {}", operation.verb(), subject),
    }
}

impl SubscriptionError {
    /// Wrap a collaborator error with the context of the operation that
    /// issued the call.
    pub fn collaborator(
        collaborator: Collaborator,
        operation: Operation,
        id: Option<String>,
        source: CollaboratorError,
    ) -> Self {
        match collaborator {
            Collaborator::Billing => SubscriptionError::BillingFailure {
                operation,
                id,
                source,
            },
            Collaborator::Persistence => SubscriptionError::PersistenceFailure {
                operation,
                id,
                source,
            },
        }
    }

    /// The operation that produced this error. `NotFound` only comes from
    /// retrieve.
    pub fn operation(&self) -> Operation {
        match self {
            SubscriptionError::BillingFailure { operation, .. }
            | SubscriptionError::PersistenceFailure { operation, .. }
            | SubscriptionError::PartialFailure { operation, .. }
            | SubscriptionError::AlreadySettled { operation, .. } => *operation,
            SubscriptionError::NotFound { .. } => Operation::Retrieve,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SubscriptionError::NotFound { .. })
    }
}
