//! Bounded worker pool for background exports and downloads.
//!
//! At most `max_concurrent` jobs run at once; up to `max_queued` more wait
//! for a slot. Anything beyond that is refused with [`Error::Busy`] before
//! the caller creates any record.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use cs_core::config::JobsConfig;
use cs_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(cfg: &JobsConfig) -> Self {
        let running = cfg.max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(running)),
            admitted: Arc::new(AtomicUsize::new(0)),
            capacity: running + cfg.max_queued,
        }
    }

    /// Reserve room for one job, or fail with `Busy` when the pool and its
    /// queue are full.
    pub fn try_admit(&self) -> Result<Admission> {
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|n| {
                tracing::warn!(in_flight = n, capacity = self.capacity, "Worker pool full");
                Error::Busy(format!("too many jobs in progress ({n}); try again later"))
            })?;
        Ok(Admission { pool: self.clone() })
    }

    /// Jobs admitted and not yet finished (running or waiting).
    pub fn in_flight(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A reserved place in the pool. Dropping it without spawning frees the
/// place again.
#[must_use = "an admission holds a pool slot until spawned or dropped"]
#[derive(Debug)]
pub struct Admission {
    pool: WorkerPool,
}

impl Admission {
    /// Run `job` once a concurrency slot frees up.
    pub fn spawn<F>(self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let _permit = match self.pool.slots.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    tracing::error!("Worker pool closed; dropping job");
                    return;
                }
            };
            job.await;
            drop(self);
        })
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.pool.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}
