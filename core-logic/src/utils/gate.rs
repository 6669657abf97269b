//! # Concurrency Gate
//!
//! Bounded admission for account workers. At most `limit` holders of a
//! [`GatePermit`] exist at any time; everyone else queues.
//!
//! Waiters are served strictly in arrival order: the tokio semaphore is fair,
//! so the permit freed by a release goes to the longest-waiting caller no
//! matter which task released it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GateCounters {
    active: AtomicUsize,
    waiting: AtomicUsize,
    admitted: AtomicUsize,
    completed: AtomicUsize,
    peak: AtomicUsize,
}

/// Point-in-time view of the gate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub limit: usize,
    pub active: usize,
    pub waiting: usize,
    pub admitted: usize,
    pub completed: usize,
    pub peak: usize,
}

#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    counters: Arc<GateCounters>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = if limit == 0 {
            warn!("Concurrency limit 0 would block every account, using 1");
            1
        } else {
            limit
        };

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            counters: Arc::new(GateCounters::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waits (without timeout) for a free slot.
    ///
    /// The slot is held until the returned permit is dropped or
    /// [`GatePermit::release`]d.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = {
            let _waiting = WaitingGuard::enter(&self.counters.waiting);
            Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .context("Concurrency gate closed")?
        };

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.admitted.fetch_add(1, Ordering::SeqCst);
        self.counters.peak.fetch_max(active, Ordering::SeqCst);
        debug!("Gate admitted (active {}/{})", active, self.limit);

        Ok(GatePermit {
            permit: Some(permit),
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Number of callers currently suspended in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.counters.waiting.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously admitted holders seen so far.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            limit: self.limit,
            active: self.active(),
            waiting: self.waiting(),
            admitted: self.counters.admitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            peak: self.peak(),
        }
    }
}

/// RAII slot in the gate. Dropping it frees the slot for the next waiter.
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<GateCounters>,
}

impl GatePermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        // counters first: `active` must never read above the limit
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        self.permit.take();
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
