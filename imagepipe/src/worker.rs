//! Bounded pools for blocking work.
//!
//! Decoding, processing and disk cache I/O are CPU or disk bound and run on
//! `spawn_blocking` threads. Each kind of work gets its own [`WorkerPool`]
//! that caps how many closures of that kind run at once.
//!
//! Callers waiting for a slot are ordered by priority, read from each
//! caller's `watch` channel at the moment a slot frees up, so a priority
//! change while queued takes effect. Equal priorities keep arrival order.
//! Work that is cancelled while still waiting for a slot never runs.

use crate::request::Priority;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Errors that can occur when running work on a pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The closure panicked on its worker thread
    #[error("task panicked: {0}")]
    TaskPanicked(String),
    /// The owning task was cancelled before the closure started
    #[error("work cancelled before start")]
    Cancelled,
}

/// Point-in-time counters of one [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub name: &'static str,
    pub in_flight: usize,
    pub queued: usize,
    pub peak_in_flight: usize,
    pub completed: usize,
}

/// Priority-ordered, bounded wrapper over `spawn_blocking`.
///
/// Cloning shares the same slots and counters.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    name: &'static str,
    max_concurrent: usize,
    slots: Mutex<Slots>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Debug)]
struct Slots {
    available: usize,
    next_sequence: u64,
    waiters: Vec<Waiter>,
}

#[derive(Debug)]
struct Waiter {
    sequence: u64,
    priority: watch::Receiver<Priority>,
    grant: oneshot::Sender<Slot>,
}

impl Slots {
    /// Removes and returns the waiter that should run next.
    fn pop_next(&mut self) -> Option<Waiter> {
        self.waiters.retain(|w| !w.grant.is_closed());
        let index = self
            .waiters
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let pa = *a.priority.borrow();
                let pb = *b.priority.borrow();
                pa.cmp(&pb).then(b.sequence.cmp(&a.sequence))
            })
            .map(|(index, _)| index)?;
        Some(self.waiters.swap_remove(index))
    }
}

impl PoolInner {
    /// Returns a slot to the pool, handing it to the best waiter if any.
    fn release(self: &Arc<Self>) {
        loop {
            let waiter = {
                let mut slots = self.slots.lock();
                match slots.pop_next() {
                    Some(waiter) => waiter,
                    None => {
                        slots.available += 1;
                        return;
                    }
                }
            };
            match waiter.grant.send(Slot::new(Arc::clone(self))) {
                Ok(()) => return,
                // Waiter gave up between the check and the send.
                Err(slot) => slot.disarm(),
            }
        }
    }
}

/// One unit of pool capacity. Dropping it releases the capacity.
#[derive(Debug)]
struct Slot {
    pool: Option<Arc<PoolInner>>,
}

impl Slot {
    fn new(pool: Arc<PoolInner>) -> Self {
        Self { pool: Some(pool) }
    }

    /// Forgets the slot without releasing it.
    fn disarm(mut self) {
        self.pool = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
    }
}

impl WorkerPool {
    /// Creates a pool running at most `max_concurrent` closures at once.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");

        Self {
            inner: Arc::new(PoolInner {
                name,
                max_concurrent,
                slots: Mutex::new(Slots {
                    available: max_concurrent,
                    next_sequence: 0,
                    waiters: Vec::new(),
                }),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Runs `f` on a blocking thread once a slot is available.
    ///
    /// While queued, the caller's place is decided by the current value of
    /// `priority`. Returns `ExecutorError::Cancelled` without running `f`
    /// if `token` fires while waiting. Once started, `f` always runs to
    /// completion.
    pub async fn run<F, R>(
        &self,
        token: &CancellationToken,
        priority: watch::Receiver<Priority>,
        f: F,
    ) -> Result<R, ExecutorError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if token.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let slot = match self.try_acquire(priority) {
            Ok(slot) => slot,
            Err(granted) => {
                // A slot sent after cancellation is dropped with the
                // receiver and goes back to the pool.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ExecutorError::Cancelled),
                    slot = granted => match slot {
                        Ok(slot) => slot,
                        Err(_) => return Err(ExecutorError::Cancelled),
                    },
                }
            }
        };

        let _running = self.track(slot);
        let result = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| ExecutorError::TaskPanicked(e.to_string()));
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Takes a free slot, or joins the queue.
    fn try_acquire(&self, priority: watch::Receiver<Priority>) -> Result<Slot, oneshot::Receiver<Slot>> {
        let mut slots = self.inner.slots.lock();
        if slots.available > 0 {
            slots.available -= 1;
            return Ok(Slot::new(Arc::clone(&self.inner)));
        }

        let (grant, granted) = oneshot::channel();
        let sequence = slots.next_sequence;
        slots.next_sequence += 1;
        slots.waiters.retain(|w| !w.grant.is_closed());
        slots.waiters.push(Waiter {
            sequence,
            priority,
            grant,
        });
        Err(granted)
    }

    fn track(&self, slot: Slot) -> Running<'_> {
        let current = self.inner.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .peak_in_flight
            .fetch_max(current, Ordering::Relaxed);

        Running {
            _slot: slot,
            in_flight: &self.inner.in_flight,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Closures currently executing.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner
            .slots
            .lock()
            .waiters
            .iter()
            .filter(|w| !w.grant.is_closed())
            .count()
    }

    /// Highest concurrency observed since creation.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Closures that finished, including panicked ones.
    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            name: self.name(),
            in_flight: self.in_flight(),
            queued: self.queued(),
            peak_in_flight: self.peak_in_flight(),
            completed: self.completed(),
        }
    }
}

struct Running<'a> {
    _slot: Slot,
    in_flight: &'a AtomicUsize,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
