// src/sched/mod.rs

//! Round-robin, time-sliced scheduler for the per-task driver threads.
//!
//! The host environment caps how many OS threads may run hot at once, so
//! driver threads that would otherwise busy-loop on subprocess I/O
//! serialize their polling through one FIFO queue of [`SchedulerHandle`]s.
//! The front handle is granted a slice computed as a fixed total budget
//! divided by the current queue length: the more concurrent waiters, the
//! smaller each slice.
//!
//! There is one [`RoundRobin`] instance per process, owned by whoever
//! constructs execution contexts and injected by `Arc` into every task
//! controller. No global mutable state. Cancellation is per handle rather
//! than per scheduler: marking a handle finished refuses its future
//! requests and wakes it empty-handed if already queued, so aborting one
//! invocation never disturbs the queue for the others.

pub mod handle;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub use handle::SchedulerHandle;

/// Floor for a single grant so a crowded queue still makes progress.
const MIN_SLICE: Duration = Duration::from_millis(1);

/// Default total budget split across the current waiters.
pub const DEFAULT_BUDGET: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Queue {
    waiting: VecDeque<Arc<SchedulerHandle>>,
    /// Whether a granted slice is currently outstanding.
    active: bool,
}

/// FIFO time-slice scheduler shared by all task controllers.
#[derive(Debug)]
pub struct RoundRobin {
    inner: Mutex<Queue>,
    budget: Duration,
}

/// An in-flight time slice. Dropping the guard relinquishes the grant and
/// passes the baton to the next waiter, so release happens on every path.
#[derive(Debug)]
pub struct Slice {
    scheduler: Arc<RoundRobin>,
    duration: Duration,
}

impl Slice {
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for Slice {
    fn drop(&mut self) {
        self.scheduler.relinquish();
    }
}

impl RoundRobin {
    pub fn new(budget: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Queue {
                waiting: VecDeque::new(),
                active: false,
            }),
            budget,
        })
    }

    /// Enqueue a handle. If no slice is outstanding, the front of the queue
    /// is granted immediately.
    pub fn push(&self, handle: Arc<SchedulerHandle>) {
        let mut queue = self.lock();
        queue.waiting.push_back(handle);
        if !queue.active {
            self.grant_front(&mut queue);
        }
    }

    /// Request one fair time slice for `handle`, blocking until granted.
    ///
    /// Returns `None` when the handle has been marked finished, which the
    /// owning controller treats as a cancellation signal.
    pub fn request_slice(self: &Arc<Self>, handle: &Arc<SchedulerHandle>) -> Option<Slice> {
        if handle.is_finished() {
            return None;
        }
        self.push(Arc::clone(handle));
        let duration = handle.await_grant()?;
        Some(Slice {
            scheduler: Arc::clone(self),
            duration,
        })
    }

    /// Number of handles currently queued (excluding the active grant).
    pub fn queue_len(&self) -> usize {
        self.lock().waiting.len()
    }

    fn relinquish(&self) {
        let mut queue = self.lock();
        queue.active = false;
        self.grant_front(&mut queue);
    }

    /// Grant the front non-finished handle its slice; finished handles are
    /// woken permanently and skipped.
    fn grant_front(&self, queue: &mut Queue) {
        while let Some(handle) = queue.waiting.pop_front() {
            if handle.is_finished() {
                handle.release();
                continue;
            }
            let waiters = queue.waiting.len() + 1;
            let slice = std::cmp::max(self.budget / waiters as u32, MIN_SLICE);
            queue.active = true;
            handle.grant(slice);
            return;
        }
        queue.active = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
