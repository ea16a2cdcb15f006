//! Concurrency admission gate
//!
//! A fixed pool of search slots bounds how many store calls run at once.
//! Acquisition never blocks or queues: a request either takes a slot
//! immediately or is shed with a capacity error. Slot release is tied to
//! permit drop, so it happens on every exit path, including panics and
//! cancellation unwinds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

/// Fixed-capacity slot pool for in-flight searches.
#[derive(Debug)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    pending: Arc<AtomicUsize>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot without waiting. `None` means the pool is exhausted and
    /// the caller must shed the request; nothing is counted in that case.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Some(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Configured pool size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests inside the engine that have not yet acquired a slot.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Mark a request as pre-admission. Dropped once a slot is acquired or
    /// the request terminates early.
    pub fn begin_pending(&self) -> PendingGuard {
        self.pending.fetch_add(1, Ordering::Relaxed);
        PendingGuard {
            pending: Arc::clone(&self.pending),
        }
    }
}

/// One held search slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Gauge guard for the pre-admission phase of a request.
#[derive(Debug)]
pub struct PendingGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
