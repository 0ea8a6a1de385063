//! Cooperative stop, pause and deadline control.
//!
//! A [`CancellationToken`] is shared between the thread that controls a run
//! and the thread doing the work. The worker calls
//! [`checkpoint`](CancellationToken::checkpoint) between units of work; it
//! never interrupts work already in flight.

use crate::compat::{Arc, Condvar, Mutex};
use crate::lockfree::AtomicFlag;
use std::time::Instant;

/// Outcome of a [`CancellationToken::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stopped,
    DeadlineExceeded,
}

#[derive(Debug, Default)]
struct TokenState {
    stopped: AtomicFlag,
    paused: Mutex<bool>,
    resumed: Condvar,
    deadline: Mutex<Option<Instant>>,
}

/// Shared cancellation handle. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Also wakes a worker blocked in a paused checkpoint.
    pub fn stop(&self) {
        self.state.stopped.set(true);
        let mut paused = self.state.paused.lock();
        *paused = false;
        self.state.resumed.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.get()
    }

    pub fn pause(&self) {
        *self.state.paused.lock() = true;
    }

    pub fn resume(&self) {
        let mut paused = self.state.paused.lock();
        *paused = false;
        self.state.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.state.paused.lock()
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.state.deadline.lock() = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.state.deadline.lock()
    }

    /// Clear stop, pause and deadline so the token can drive a new run.
    pub fn reset(&self) {
        self.state.stopped.set(false);
        *self.state.paused.lock() = false;
        *self.state.deadline.lock() = None;
    }

    /// Called by the worker between units of work.
    ///
    /// Blocks while the token is paused. Returns as soon as the run may
    /// continue, a stop was requested, or the deadline passed.
    pub fn checkpoint(&self) -> Checkpoint {
        let deadline = self.deadline();
        if let Some(outcome) = self.poll(deadline) {
            return outcome;
        }

        let mut paused = self.state.paused.lock();
        while *paused && !self.state.stopped.get() {
            match deadline {
                Some(deadline) => {
                    if self
                        .state
                        .resumed
                        .wait_until(&mut paused, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.state.resumed.wait(&mut paused),
            }
        }
        drop(paused);

        self.poll(deadline).unwrap_or(Checkpoint::Continue)
    }

    fn poll(&self, deadline: Option<Instant>) -> Option<Checkpoint> {
        if self.state.stopped.get() {
            return Some(Checkpoint::Stopped);
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Checkpoint::DeadlineExceeded),
            _ => None,
        }
    }
}
