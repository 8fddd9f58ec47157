//! Upload concurrency limiting.
//!
//! Staging writes to disk and remote commits hold sockets open, so the number of uploads in
//! flight can be capped. Requests over the cap wait in a bounded queue for a bounded time and
//! are then turned away with HTTP 429.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::{FileLimitsConfig, LimitsConfig};
use crate::errors::{Error, Result};

/// All limiters shared through application state.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// `None` when uploads are unlimited
    pub uploads: Option<Arc<UploadLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            uploads: UploadLimiter::new(&config.files).map(Arc::new),
        }
    }

    /// Acquire an upload slot, or `None` if uploads are unlimited
    pub async fn upload_slot(&self) -> Result<Option<UploadPermit>> {
        match &self.uploads {
            Some(limiter) => limiter.acquire().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Semaphore over concurrent uploads with a bounded waiting queue.
#[derive(Debug)]
pub struct UploadLimiter {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    /// `None` = queue without bound
    queue_capacity: Option<usize>,
    max_wait: Duration,
}

/// Counts a request as waiting for as long as it lives.
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn too_many(message: &str) -> Error {
    Error::TooManyRequests {
        message: message.to_string(),
    }
}

impl UploadLimiter {
    /// Build a limiter, or `None` when `max_concurrent_uploads` is 0.
    ///
    /// `max_waiting_uploads` of 0 leaves the waiting queue unbounded.
    pub fn new(config: &FileLimitsConfig) -> Option<Self> {
        (config.max_concurrent_uploads > 0).then(|| Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting: AtomicUsize::new(0),
            queue_capacity: (config.max_waiting_uploads > 0).then_some(config.max_waiting_uploads),
            max_wait: Duration::from_secs(config.max_upload_wait_secs),
        })
    }

    /// Wait for an upload slot.
    ///
    /// Fails with [`Error::TooManyRequests`] when the queue is full, when `max_wait` is zero
    /// and no slot is free, or when no slot frees up within `max_wait`.
    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.waiting);
        if self.queue_capacity.is_some_and(|capacity| ahead >= capacity) {
            debug!(waiting = ahead, "Upload queue full");
            return Err(too_many("Too many file uploads in progress. Please retry later."));
        }

        // A slot may have been released while joining the queue
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        if self.max_wait.is_zero() {
            return Err(too_many("Too many file uploads in progress. Please retry later."));
        }

        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(too_many("Upload service temporarily unavailable.")),
            Err(_elapsed) => Err(too_many("Timed out waiting for upload slot. Please retry later.")),
        }
    }
}

/// Holds an upload slot until dropped.
#[must_use]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}
