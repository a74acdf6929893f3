// src/engine/gate.rs

//! One-shot dispatch latch between the dispatch loop and a driver thread.

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Closed,
    Open,
    Cancelled,
}

/// A paused driver thread blocks on its gate until the dispatch loop selects
/// its task (open) or tears the context down (cancel). Both are latches:
/// once set, every subsequent wait returns immediately.
#[derive(Debug)]
pub struct DispatchGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Closed),
            cv: Condvar::new(),
        }
    }

    /// Let the waiting driver proceed to dispatch its task.
    pub fn open(&self) {
        self.set(GateState::Open);
    }

    /// Wake the waiting driver empty-handed.
    pub fn cancel(&self) {
        self.set(GateState::Cancelled);
    }

    /// Block until the gate is decided. `true` means dispatched, `false`
    /// means cancelled.
    pub fn wait(&self) -> bool {
        let mut state = self.lock();
        loop {
            match *state {
                GateState::Closed => {
                    state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                GateState::Open => return true,
                GateState::Cancelled => return false,
            }
        }
    }

    fn set(&self, next: GateState) {
        let mut state = self.lock();
        // Cancellation must not resurrect an undecided gate as open, but an
        // already-open gate stays open.
        if *state == GateState::Closed {
            *state = next;
            self.cv.notify_all();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn open_releases_a_waiter() {
        let gate = Arc::new(DispatchGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };
        gate.open();
        assert!(waiter.join().expect("waiter thread"));
    }

    #[test]
    fn gate_is_a_latch() {
        let gate = DispatchGate::new();
        gate.open();
        assert!(gate.wait());
        assert!(gate.wait());
    }

    #[test]
    fn cancel_wins_only_while_undecided() {
        let gate = DispatchGate::new();
        gate.open();
        gate.cancel();
        assert!(gate.wait());

        let gate = DispatchGate::new();
        gate.cancel();
        gate.open();
        assert!(!gate.wait());
    }
}
