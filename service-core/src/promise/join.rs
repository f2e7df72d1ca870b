//! Join combinators over independently running promises.

use super::{Promise, Resolver};
use std::convert::Infallible;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Bookkeeping for one join: outstanding completions, the values collected so
/// far, and the joined promise's resolver, which doubles as the first-error
/// latch.
struct JoinGroup<S, T, E> {
    remaining: AtomicUsize,
    slots: Mutex<S>,
    resolver: Resolver<T, E>,
}

impl<S, T, E> JoinGroup<S, T, E>
where
    S: Default,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn new(count: usize, slots: S, resolver: Resolver<T, E>) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(count),
            slots: Mutex::new(slots),
            resolver,
        })
    }

    /// Record one completion. Returns the collected slots once the last
    /// outstanding input has arrived.
    fn arrive(&self, fill: impl FnOnce(&mut S)) -> Option<S> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        fill(&mut slots);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            Some(mem::take(&mut *slots))
        } else {
            None
        }
    }

    fn succeed(&self, value: T) {
        if self.resolver.resolve(value).is_err() {
            tracing::debug!("join completed after an earlier rejection");
        }
    }

    fn fail(&self, error: E) {
        if self.resolver.reject(error).is_err() {
            tracing::debug!("join already settled, later rejection observed and dropped");
        }
    }
}

/// Resolve once every input resolves, with the values in input order.
///
/// Rejects with the first rejection observed; outcomes arriving afterwards
/// cannot overwrite it. An empty input resolves immediately.
pub fn all<T, E>(promises: Vec<Promise<T, E>>) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let (joined, resolver) = Promise::create();
    if promises.is_empty() {
        resolver.resolve(Vec::new()).ok();
        return joined;
    }

    let slots: Vec<Option<T>> = promises.iter().map(|_| None).collect();
    let group = JoinGroup::new(promises.len(), slots, resolver);

    for (index, promise) in promises.into_iter().enumerate() {
        let group = Arc::clone(&group);
        promise.on_settled(move |outcome| match outcome {
            Ok(value) => {
                if let Some(slots) = group.arrive(|slots| slots[index] = Some(value)) {
                    group.succeed(slots.into_iter().flatten().collect());
                }
            }
            Err(error) => group.fail(error),
        });
    }

    joined
}

/// Two-way [`all`] for promises of different value types.
pub fn join<A, B, E>(first: Promise<A, E>, second: Promise<B, E>) -> Promise<(A, B), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let (joined, resolver) = Promise::create();
    let group = JoinGroup::new(2, (None::<A>, None::<B>), resolver);

    let first_group = Arc::clone(&group);
    first.on_settled(move |outcome| match outcome {
        Ok(value) => {
            if let Some((Some(a), Some(b))) = first_group.arrive(|slots| slots.0 = Some(value)) {
                first_group.succeed((a, b));
            }
        }
        Err(error) => first_group.fail(error),
    });

    second.on_settled(move |outcome| match outcome {
        Ok(value) => {
            if let Some((Some(a), Some(b))) = group.arrive(|slots| slots.1 = Some(value)) {
                group.succeed((a, b));
            }
        }
        Err(error) => group.fail(error),
    });

    joined
}

/// Wait for both outcomes, successful or not.
///
/// Never rejects; used to inspect how two independent calls ended after a
/// short-circuiting join has already reported the first failure.
pub fn join_settled<A, B, E>(
    first: Promise<A, E>,
    second: Promise<B, E>,
) -> Promise<(Result<A, E>, Result<B, E>), Infallible>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let (joined, resolver) = Promise::create();
    let group = JoinGroup::new(
        2,
        (None::<Result<A, E>>, None::<Result<B, E>>),
        resolver,
    );

    let first_group = Arc::clone(&group);
    first.on_settled(move |outcome| {
        if let Some((Some(a), Some(b))) = first_group.arrive(|slots| slots.0 = Some(outcome)) {
            first_group.succeed((a, b));
        }
    });

    second.on_settled(move |outcome| {
        if let Some((Some(a), Some(b))) = group.arrive(|slots| slots.1 = Some(outcome)) {
            group.succeed((a, b));
        }
    });

    joined
}
