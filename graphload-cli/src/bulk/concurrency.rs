//! Chunk concurrency limiter
//!
//! Semaphore-based gate bounding how many chunk transactions run at once.
//! The ceiling must stay below the storage pool size or chunks starve
//! waiting for connections.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds the number of chunks executing concurrently
#[derive(Debug, Clone)]
pub struct ChunkLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    acquired: Arc<AtomicU64>,
    waited: Arc<AtomicU64>,
}

impl ChunkLimiter {
    /// Create a limiter with `max_concurrency` permits (at least one)
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            acquired: Arc::new(AtomicU64::new(0)),
            waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a permit; it is released when dropped
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        if self.semaphore.available_permits() == 0 {
            self.waited.fetch_add(1, Ordering::Relaxed);
            debug!("Chunk limiter: waiting for permit ({} in use)", self.max_concurrency);
        }

        let permit = self.semaphore.clone().acquire_owned().await?;
        self.acquired.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Chunk limiter: acquired permit ({}/{} in use)",
            self.in_use(),
            self.max_concurrency
        );

        Ok(permit)
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn in_use(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            available_permits: self.available_permits(),
            max_concurrency: self.max_concurrency,
            acquired: self.acquired.load(Ordering::Relaxed),
            waited: self.waited.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of limiter usage
#[derive(Debug, Clone)]
pub struct LimiterStats {
    pub available_permits: usize,
    pub max_concurrency: usize,
    /// Permits handed out since creation
    pub acquired: u64,
    /// Acquisitions that found the limiter full
    pub waited: u64,
}

impl LimiterStats {
    pub fn wait_rate(&self) -> f64 {
        if self.acquired == 0 {
            0.0
        } else {
            self.waited as f64 / self.acquired as f64
        }
    }

    pub fn in_use(&self) -> usize {
        self.max_concurrency.saturating_sub(self.available_permits)
    }
}
