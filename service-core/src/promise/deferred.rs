//! Two-phase promises: build and wire handlers first, start the work second.

use super::{Promise, Resolver};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;

enum Work<T, E> {
    Future(BoxFuture<'static, Result<T, E>>),
    Body(Box<dyn FnOnce(Resolver<T, E>) + Send + 'static>),
}

/// An unstarted promise.
///
/// Nothing runs until [`Deferred::invoke`], so every handler registered on
/// the deferred is in place before the underlying work can complete.
pub struct Deferred<T, E> {
    promise: Promise<T, E>,
    resolver: Resolver<T, E>,
    work: Work<T, E>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Defer a future. `invoke` spawns it on the tokio runtime and settles
    /// the promise with its output.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (promise, resolver) = Promise::create();
        Self {
            promise,
            resolver,
            work: Work::Future(future.boxed()),
        }
    }

    /// Defer a body that settles the promise itself through the resolver.
    ///
    /// `invoke` runs the body synchronously; it is expected to dispatch its
    /// own asynchronous calls.
    pub fn from_fn<F>(body: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) + Send + 'static,
    {
        let (promise, resolver) = Promise::create();
        Self {
            promise,
            resolver,
            work: Work::Body(Box::new(body)),
        }
    }

    /// Register a success handler.
    pub fn then<F>(self, on_success: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.promise.on_settled(move |outcome| {
            if let Ok(value) = outcome {
                on_success(value);
            }
        });
        self
    }

    /// Register an error handler.
    pub fn catch_error<F>(self, on_error: F) -> Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        self.promise.on_settled(move |outcome| {
            if let Err(error) = outcome {
                on_error(error);
            }
        });
        self
    }

    /// The promise this deferred will settle, for wiring derived chains
    /// before the work starts.
    pub fn promise(&self) -> &Promise<T, E> {
        &self.promise
    }

    /// Start the work and hand out the promise.
    pub fn invoke(self) -> Promise<T, E> {
        let Deferred {
            promise,
            resolver,
            work,
        } = self;

        match work {
            Work::Future(future) => {
                tokio::spawn(async move {
                    let outcome = future.await;
                    if resolver.settle(outcome).is_err() {
                        tracing::debug!("deferred work finished after its promise was settled");
                    }
                });
            }
            Work::Body(body) => body(resolver),
        }

        promise
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.work {
            Work::Future(_) => "future",
            Work::Body(_) => "body",
        };
        f.debug_struct("Deferred").field("work", &kind).finish()
    }
}
