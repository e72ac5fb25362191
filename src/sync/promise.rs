// Resolvable state promise
// A value container that is pending, resolved or rejected. While pending it
// collects continuations ("mappers") that run in registration order once the
// value or the error arrives. Settling is first-write-wins.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// The settlement state of a promise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseState<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
}

impl<T, E> PromiseState<T, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }

    fn as_result(&self) -> Option<Result<&T, &E>> {
        match self {
            PromiseState::Pending => None,
            PromiseState::Resolved(value) => Some(Ok(value)),
            PromiseState::Rejected(err) => Some(Err(err)),
        }
    }
}

type Mapper<T, E> = Box<dyn FnOnce(Result<&T, &E>) + Send>;

struct PromiseInner<T, E> {
    state: PromiseState<T, E>,
    mappers: Vec<Mapper<T, E>>,
}

/// A promise whose continuations are attached before or after it settles
pub struct StatePromise<T, E> {
    inner: Mutex<PromiseInner<T, E>>,
    settled: Notify,
}

impl<T, E> StatePromise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create an unresolved promise
    pub fn new() -> Self {
        Self::with_state(PromiseState::Pending)
    }

    /// Create a promise that is already resolved
    pub fn resolved(value: T) -> Self {
        Self::with_state(PromiseState::Resolved(value))
    }

    /// Create a promise that already failed
    pub fn rejected(err: E) -> Self {
        Self::with_state(PromiseState::Rejected(err))
    }

    fn with_state(state: PromiseState<T, E>) -> Self {
        Self {
            inner: Mutex::new(PromiseInner {
                state,
                mappers: Vec::new(),
            }),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PromiseInner<T, E>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the promise. Returns false if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(PromiseState::Resolved(value))
    }

    /// Fail the promise. Returns false if it was already settled.
    pub fn reject(&self, err: E) -> bool {
        self.settle(PromiseState::Rejected(err))
    }

    fn settle(&self, next: PromiseState<T, E>) -> bool {
        let (settled, mappers) = {
            let mut inner = self.lock();
            if !inner.state.is_pending() {
                return false;
            }
            inner.state = next;
            (inner.state.clone(), std::mem::take(&mut inner.mappers))
        };
        self.settled.notify_waiters();

        // Continuations run outside the lock so they may touch this promise again
        if let Some(result) = settled.as_result() {
            for mapper in mappers {
                mapper(result);
            }
        }
        true
    }

    /// Current state snapshot
    pub fn state(&self) -> PromiseState<T, E> {
        self.lock().state.clone()
    }

    pub fn is_settled(&self) -> bool {
        !self.lock().state.is_pending()
    }

    /// Attach a continuation. Runs immediately if the promise already settled.
    pub fn subscribe<F>(&self, mapper: F)
    where
        F: FnOnce(Result<&T, &E>) + Send + 'static,
    {
        let settled = {
            let mut inner = self.lock();
            if inner.state.is_pending() {
                inner.mappers.push(Box::new(mapper));
                return;
            }
            inner.state.clone()
        };
        if let Some(result) = settled.as_result() {
            mapper(result);
        }
    }

    /// Derive a promise that transforms the eventual value and forwards the eventual error
    pub fn map<U, F>(&self, f: F) -> Arc<StatePromise<U, E>>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like `map`, but the transformation itself may fail
    pub fn try_map<U, F>(&self, f: F) -> Arc<StatePromise<U, E>>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&T) -> Result<U, E> + Send + 'static,
    {
        let derived = Arc::new(StatePromise::new());
        let target = Arc::clone(&derived);
        self.subscribe(move |result| match result.map(f) {
            Ok(Ok(value)) => {
                target.resolve(value);
            }
            Ok(Err(err)) => {
                target.reject(err);
            }
            Err(err) => {
                target.reject(err.clone());
            }
        });
        derived
    }

    /// Wait for the promise to settle
    pub async fn wait(&self) -> Result<T, E> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.state() {
                PromiseState::Pending => notified.await,
                PromiseState::Resolved(value) => return Ok(value),
                PromiseState::Rejected(err) => return Err(err),
            }
        }
    }
}

impl<T, E> Default for StatePromise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
