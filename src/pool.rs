//! Bounded worker pool for CPU-bound compression
//!
//! One pool is created per process and shared by every concurrent batch.
//! Work runs on tokio's blocking threads, admitted through a semaphore sized
//! to the available cores.

use crate::error::CompressionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// External abort signal for one document job.
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`AbortHandle::abort`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Size the pool to the number of available CPU cores.
    pub fn with_available_cores() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` on a worker once a slot is free.
    ///
    /// Returns `None` when `abort` fires before the work is admitted. Admitted
    /// work always runs to completion and keeps its slot until it does, even
    /// when the caller stops waiting because `deadline` expired.
    pub async fn run<F, T>(
        &self,
        abort: &AbortHandle,
        deadline: Duration,
        work: F,
    ) -> Option<Result<T, CompressionError>>
    where
        F: FnOnce() -> Result<T, CompressionError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = abort.cancelled() => return None,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return Some(Err(CompressionError::Worker(e.to_string()))),
            },
        };
        if abort.is_aborted() {
            return None;
        }

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        let outcome = match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CompressionError::Worker(format!(
                "Compression task join error: {}",
                e
            ))),
            Err(_) => Err(CompressionError::Timeout { after: deadline }),
        };
        Some(outcome)
    }
}
