//! Single-assignment asynchronous result cell.
//!
//! A [`Promise`] starts pending and settles exactly once, either resolved with
//! a value or rejected with an error. The private [`Resolver`] returned by
//! [`Promise::create`] is the only way to settle it; the promise side only
//! registers continuations or awaits the outcome.
//!
//! Settlement is guarded by an atomic compare-and-set from pending to settled.
//! The winner stores the outcome, wakes awaiting tasks and runs the registered
//! continuations in registration order on its own task. Losers get
//! [`SettleError::AlreadySettled`] and the delivered outcome is never touched.
//!
//! Continuations registered after settlement run immediately with the known
//! outcome, so no notification is ever missed.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use thiserror::Error;

mod deferred;
mod join;

pub use deferred::Deferred;
pub use join::{all, join, join_settled};

const PENDING: u8 = 0;
const SETTLED: u8 = 1;

/// Raised when a settled promise is resolved or rejected again.
///
/// This is a programming error, distinct from the business errors a promise
/// carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SettleError {
    #[error("promise already settled")]
    AlreadySettled,
}

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

struct Slot<T, E> {
    outcome: Option<Result<T, E>>,
    continuations: Vec<Continuation<T, E>>,
    wakers: Vec<Waker>,
}

struct Shared<T, E> {
    state: AtomicU8,
    slot: Mutex<Slot<T, E>>,
}

impl<T, E> Shared<T, E> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            slot: Mutex::new(Slot {
                outcome: None,
                continuations: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T, E>> {
        // Continuations never run under the lock, so a poisoned slot still
        // holds consistent data.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn settle(&self, outcome: Result<T, E>) -> Result<(), SettleError> {
        if self
            .state
            .compare_exchange(PENDING, SETTLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SettleError::AlreadySettled);
        }

        let (continuations, wakers) = {
            let mut slot = self.lock();
            slot.outcome = Some(outcome.clone());
            (
                mem::take(&mut slot.continuations),
                mem::take(&mut slot.wakers),
            )
        };

        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(outcome.clone());
        }

        Ok(())
    }

    fn subscribe(&self, continuation: Continuation<T, E>) {
        let mut slot = self.lock();
        let Some(outcome) = slot.outcome.clone() else {
            slot.continuations.push(continuation);
            return;
        };
        drop(slot);
        continuation(outcome);
    }
}

/// Consumer side of a settle-once asynchronous result.
///
/// Cloning a promise yields another observer of the same cell.
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

/// Producer side of a [`Promise`]. Only the creator holds it.
///
/// Clones settle the same promise; the first settlement wins.
pub struct Resolver<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a pending promise and the resolver that settles it.
    pub fn create() -> (Self, Resolver<T, E>) {
        let shared = Arc::new(Shared::new());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Resolver { shared },
        )
    }

    /// A promise already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = Self::create();
        resolver.resolve(value).ok();
        promise
    }

    /// A promise already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        let (promise, resolver) = Self::create();
        resolver.reject(error).ok();
        promise
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    /// The outcome, if one has been delivered.
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.shared.lock().outcome.clone()
    }

    /// Register a continuation that receives the outcome, whichever it is.
    pub fn on_settled<F>(&self, continuation: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        self.shared.subscribe(Box::new(continuation));
    }

    /// Register a success continuation.
    ///
    /// The derived promise resolves with the continuation's return value;
    /// a rejection passes through to it untouched.
    pub fn then<U, F>(&self, on_success: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (derived, resolver) = Promise::create();
        self.on_settled(move |outcome| resolver.forward(outcome.map(on_success)));
        derived
    }

    /// Register an error continuation.
    ///
    /// The handler observes the error; the derived promise carries the same
    /// outcome as this one.
    pub fn catch_error<F>(&self, on_error: F) -> Promise<T, E>
    where
        F: FnOnce(E) + Send + 'static,
    {
        let (derived, resolver) = Promise::create();
        self.on_settled(move |outcome| {
            if let Err(error) = &outcome {
                on_error(error.clone());
            }
            resolver.forward(outcome);
        });
        derived
    }

    /// Derived promise with the rejection converted by `f`.
    pub fn map_err<E2, F>(&self, f: F) -> Promise<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let (derived, resolver) = Promise::create();
        self.on_settled(move |outcome| resolver.forward(outcome.map_err(f)));
        derived
    }

    /// Chain a dependent asynchronous step.
    ///
    /// `next` runs only after this promise resolves; the derived promise
    /// adopts the outcome of the promise it returns.
    pub fn and_then<U, F>(&self, next: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        let (derived, resolver) = Promise::create();
        self.on_settled(move |outcome| match outcome {
            Ok(value) => next(value).on_settled(move |outcome| resolver.forward(outcome)),
            Err(error) => resolver.forward(Err(error)),
        });
        derived
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn resolve(&self, value: T) -> Result<(), SettleError> {
        self.shared.settle(Ok(value))
    }

    pub fn reject(&self, error: E) -> Result<(), SettleError> {
        self.shared.settle(Err(error))
    }

    pub fn settle(&self, outcome: Result<T, E>) -> Result<(), SettleError> {
        self.shared.settle(outcome)
    }

    pub fn is_settled(&self) -> bool {
        !self.shared.is_pending()
    }

    /// Settle a derived promise this module owns exclusively.
    fn forward(&self, outcome: Result<T, E>) {
        if self.settle(outcome).is_err() {
            tracing::debug!("derived promise settled twice, later outcome dropped");
        }
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.lock();
        if let Some(outcome) = slot.outcome.clone() {
            return Poll::Ready(outcome);
        }
        if !slot.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.lock();
        match &slot.outcome {
            Some(Ok(value)) => f.debug_tuple("Promise::Resolved").field(value).finish(),
            Some(Err(error)) => f.debug_tuple("Promise::Rejected").field(error).finish(),
            None => f.write_str("Promise::Pending"),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &!self.shared.is_pending())
            .finish()
    }
}
