// src/sched/handle.rs

//! Wait/notify token for one controller's time-slice requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    /// Not queued, or queued and not yet granted.
    Waiting,
    /// Granted a slice of the given length.
    Granted(Duration),
    /// Woken permanently without a grant (the owning task finished).
    Released,
}

/// One controller's token in the round-robin queue: a wait/notify primitive
/// plus a finished flag. A controller keeps one handle for its whole
/// lifetime and re-enqueues it for every slice request; consuming a grant
/// re-arms the handle for the next round. Once the finished flag is set the
/// scheduler wakes the handle permanently instead of granting it.
#[derive(Debug)]
pub struct SchedulerHandle {
    state: Mutex<HandleState>,
    cv: Condvar,
    finished: AtomicBool,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HandleState::Waiting),
            cv: Condvar::new(),
            finished: AtomicBool::new(false),
        }
    }

    /// Mark the owning controller finished: further requests are refused and
    /// a queued handle is woken empty-handed instead of granted.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn grant(&self, slice: Duration) {
        let mut state = self.lock();
        *state = HandleState::Granted(slice);
        self.cv.notify_one();
    }

    pub(crate) fn release(&self) {
        let mut state = self.lock();
        *state = HandleState::Released;
        self.cv.notify_one();
    }

    /// Block until granted a slice, or `None` if released without one.
    /// Consuming a grant re-arms the handle for its next enqueue.
    pub(crate) fn await_grant(&self) -> Option<Duration> {
        let mut state = self.lock();
        loop {
            match *state {
                HandleState::Waiting => {
                    state = self
                        .cv
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                HandleState::Granted(slice) => {
                    *state = HandleState::Waiting;
                    return Some(slice);
                }
                HandleState::Released => return None,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new()
    }
}
