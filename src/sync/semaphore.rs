// Semaphore
// Bounded admission control for work issued against a single backend.
// Waiters are served in FIFO order, a permit is returned when it is dropped.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore as TokioSemaphore};

use super::cancel::CancelToken;
use crate::error::{Error, Result};

/// Counting semaphore capping the number of in-flight operations
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<TokioSemaphore>,
    max_concurrency: usize,
}

/// An admission slot. Dropping it (or calling `release`) frees the slot.
pub struct SemaphorePermit {
    _permit: OwnedSemaphorePermit,
}

impl SemaphorePermit {
    /// Give the slot back to the semaphore
    pub fn release(self) {}
}

impl Semaphore {
    /// Create a semaphore with at least one slot
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            inner: Arc::new(TokioSemaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of slots that are free right now
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Number of slots that are currently held
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.available()
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<SemaphorePermit> {
        let permit = Arc::clone(&self.inner)
            .acquire_owned()
            .await
            .map_err(|_| Error::SemaphoreClosed)?;
        Ok(SemaphorePermit { _permit: permit })
    }

    /// Refuse all current and future waiters. Held permits stay valid.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Take a free slot without waiting
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        Arc::clone(&self.inner)
            .try_acquire_owned()
            .ok()
            .map(|permit| SemaphorePermit { _permit: permit })
    }

    /// Wait for a free slot unless the token fires first
    pub async fn acquire_with_cancel(&self, cancel: &CancelToken) -> Result<SemaphorePermit> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            permit = self.acquire() => permit,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("max_concurrency", &self.max_concurrency)
            .field("available", &self.available())
            .finish()
    }
}
