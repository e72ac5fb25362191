// Latest-value topic
// A topic remembers the most recently published value and hands out a shared
// "next value" promise. Every publish settles the current promise and installs a
// fresh one before returning, so a subscriber that asks for next() right after
// a publish waits for the following value instead of replaying the old one.

use std::sync::{Arc, Mutex, MutexGuard};

use super::promise::StatePromise;
use crate::error::Error;

/// The promise handed out by `AsyncValueTopic::next`
pub type TopicNext<T> = Arc<StatePromise<T, TopicClosed>>;

/// Rejection delivered to waiters when a topic is closed.
/// Consumers should treat it as "stop consuming".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicClosed;

impl From<TopicClosed> for Error {
    fn from(_: TopicClosed) -> Self {
        Error::TopicClosed
    }
}

struct TopicInner<T> {
    last: Option<T>,
    next: TopicNext<T>,
}

/// Latest-value publish/subscribe primitive without history
pub struct AsyncValueTopic<T> {
    inner: Mutex<TopicInner<T>>,
}

impl<T> AsyncValueTopic<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TopicInner {
                last: None,
                next: Arc::new(StatePromise::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TopicInner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a value to everyone currently waiting on next()
    pub fn publish(&self, value: T) {
        let pending = {
            let mut inner = self.lock();
            inner.last = Some(value.clone());
            std::mem::replace(&mut inner.next, Arc::new(StatePromise::new()))
        };
        pending.resolve(value);
    }

    /// The promise for the next published value.
    /// Concurrent callers share the same promise instance.
    pub fn next(&self) -> TopicNext<T> {
        Arc::clone(&self.lock().next)
    }

    /// The most recently published value, if any
    pub fn last(&self) -> Option<T> {
        self.lock().last.clone()
    }

    /// Reject everyone waiting on next(). The topic stays usable afterwards.
    pub fn close(&self) {
        let pending = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.next, Arc::new(StatePromise::new()))
        };
        pending.reject(TopicClosed);
    }
}

impl<T> Default for AsyncValueTopic<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
